//! Govnode Treasury
//!
//! Budget governance: masternodes vote on funding proposals, a finalized
//! budget fixes which proposals the next superblocks pay, and blocks are
//! checked against the best supported finalized budget.

pub mod collateral;
pub mod cycle;
pub mod error;
pub mod finalized;
pub mod gate;
pub mod manager;
pub mod proposal;
pub mod vote;

pub use collateral::{check_collateral, CollateralStatus, BUDGET_FEE_TX, PROPOSAL_FEE_TX};
pub use cycle::{BudgetTotals, Cycle, Validation, MAX_BUDGET_PAYMENTS};
pub use error::{BudgetError, Result};
pub use finalized::{
    BudgetPayment, FinalizedBudget, FinalizedBudgetBroadcast, TrxValidationStatus,
};
pub use gate::VoteGate;
pub use manager::{BudgetManager, BudgetMode, VOTE_SYNC_INTERVAL_SECONDS};
pub use proposal::{BudgetProposal, ProposalBroadcast};
pub use vote::{BudgetVote, FinalizedBudgetVote, VoteOutcome, BUDGET_VOTE_UPDATE_MIN};

/// Treasury version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
