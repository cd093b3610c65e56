//! Govnode Payment Consensus
//!
//! Masternode payment voting: the top-ranked masternodes vote on who gets
//! paid in each upcoming block, the votes are tallied per block and blocks
//! are checked against the tally.

pub mod error;
pub mod payees;
pub mod payments;
pub mod quorum;
pub mod winner;

pub use error::{PaymentError, Result};
pub use payees::{BlockPayees, Payee};
pub use payments::MasternodePayments;
pub use quorum::{SIGNATURES_REQUIRED, SIGNATURES_TOTAL};
pub use winner::PaymentWinner;

/// Payment consensus version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
