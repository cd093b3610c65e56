//! Vote thresholds for masternode payments

/// Votes a payee needs before blocks must pay it
pub const SIGNATURES_REQUIRED: u32 = 6;

/// Only this many top-ranked masternodes may vote for a height
pub const SIGNATURES_TOTAL: usize = 10;

/// Voters are ranked against the block this far below the voted height
pub const RANKING_DEPTH: i64 = 100;

/// Votes may target at most this far past the tip
pub const MAX_VOTE_LOOKAHEAD: i64 = 20;

/// Lookahead used by [`crate::MasternodePayments::is_scheduled`]
pub const SCHEDULE_LOOKAHEAD: i64 = 8;

/// Seconds of announcement age required per enabled masternode when
/// picking the next payee
pub const QUEUE_SECONDS_PER_MASTERNODE: i64 = 156;

/// Blocks of vote history kept, and searched for a payee's last payment,
/// per enabled masternode (x 1.25)
pub fn history_window(masternodes: usize) -> i64 {
    (masternodes as f64 * 1.25) as i64
}

/// Votes and tallies older than this many blocks are dropped
pub fn retention_limit(masternodes: usize) -> i64 {
    history_window(masternodes).max(1000)
}
