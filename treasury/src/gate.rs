//! Randomized pacing for automatic votes and full resyncs

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Blocks between randomized full budget resyncs, on average
pub const RESYNC_PERIOD_BLOCKS: i64 = 1440;

/// One in this many maintenance passes considers auto-voting
pub const AUTO_VOTE_ODDS: u32 = 4;

/// Seeded source for the budget's coin flips. A forced gate always answers
/// the same way.
pub struct VoteGate {
    rng: ChaCha8Rng,
    forced: Option<bool>,
}

impl VoteGate {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            forced: None,
        }
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }

    pub fn forced(pass: bool) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(0),
            forced: Some(pass),
        }
    }

    pub fn force(&mut self, pass: Option<bool>) {
        self.forced = pass;
    }

    /// Whether this pass should look at auto-voting
    pub fn auto_vote(&mut self) -> bool {
        match self.forced {
            Some(pass) => pass,
            None => self.rng.random_range(0..AUTO_VOTE_ODDS) == 0,
        }
    }

    /// Whether `height` triggers a full resync
    pub fn resync(&mut self, height: i64) -> bool {
        match self.forced {
            Some(pass) => pass,
            None => height % RESYNC_PERIOD_BLOCKS == self.rng.random_range(0..RESYNC_PERIOD_BLOCKS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_gate() {
        let mut yes = VoteGate::forced(true);
        let mut no = VoteGate::forced(false);
        for h in 0..10 {
            assert!(yes.auto_vote() && yes.resync(h));
            assert!(!no.auto_vote() && !no.resync(h));
        }
    }

    #[test]
    fn test_same_seed_same_answers() {
        let mut a = VoteGate::seeded(42);
        let mut b = VoteGate::seeded(42);
        let xs: Vec<bool> = (0..64).map(|_| a.auto_vote()).collect();
        let ys: Vec<bool> = (0..64).map(|_| b.auto_vote()).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().any(|x| *x));
        assert!(xs.iter().any(|x| !*x));
    }
}
