//! Fee transactions backing proposals and finalized budgets

use crate::cycle::Cycle;
use govnode_core::{Amount, Hash256, Script, COIN};
use log::debug;

/// Fee burned to submit a proposal
pub const PROPOSAL_FEE_TX: Amount = 20 * COIN;
/// Fee burned to submit a finalized budget
pub const BUDGET_FEE_TX: Amount = 5 * COIN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollateralStatus {
    /// Mined deep enough; `time` is the containing block's time
    Valid { time: i64, confirmations: i64 },
    Invalid { reason: String, confirmations: i64 },
}

impl CollateralStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, CollateralStatus::Valid { .. })
    }

    pub fn confirmations(&self) -> i64 {
        match self {
            CollateralStatus::Valid { confirmations, .. }
            | CollateralStatus::Invalid { confirmations, .. } => *confirmations,
        }
    }

    fn invalid(reason: String, confirmations: i64) -> Self {
        debug!(target: "mnbudget", "IsBudgetCollateralValid - {}", reason);
        CollateralStatus::Invalid {
            reason,
            confirmations,
        }
    }
}

/// Check that `fee_txid` burns the right fee to `OP_RETURN <expected>` and
/// is buried under enough blocks
pub fn check_collateral(
    cycle: &Cycle,
    fee_txid: &Hash256,
    expected: &Hash256,
    finalization: bool,
) -> CollateralStatus {
    let (tx, mined_at) = match cycle.chain.transaction(fee_txid) {
        Some(found) => found,
        None => {
            return CollateralStatus::invalid(format!("Can't find collateral tx {}", fee_txid), 0)
        }
    };
    if tx.outputs.is_empty() {
        return CollateralStatus::invalid(format!("Collateral tx {} has no outputs", fee_txid), 0);
    }
    if tx.lock_time != 0 {
        return CollateralStatus::invalid(format!("Collateral tx {} is time locked", fee_txid), 0);
    }

    let fee = if finalization {
        BUDGET_FEE_TX
    } else {
        PROPOSAL_FEE_TX
    };
    let burn = Script::op_return(expected);
    let mut found = false;
    for out in &tx.outputs {
        if !out.script.is_normal_payment_script() && !out.script.is_unspendable() {
            return CollateralStatus::invalid(format!("Invalid Script {}", fee_txid), 0);
        }
        if out.script == burn && out.value >= fee {
            found = true;
        }
    }
    if !found {
        return CollateralStatus::invalid(
            format!("Couldn't find opReturn {} in {}", expected, fee_txid),
            0,
        );
    }

    let mut confirmations = 0;
    let mut time = 0;
    if let (Some(height), Some(tip)) = (mined_at, cycle.chain.tip_height()) {
        if height <= tip {
            confirmations = tip - height + 1;
            time = cycle.chain.block_time(height).unwrap_or(0);
        }
    }

    let required = cycle.params.budget_fee_confirmations;
    if confirmations >= required {
        CollateralStatus::Valid {
            time,
            confirmations,
        }
    } else {
        CollateralStatus::invalid(
            format!(
                "Collateral requires at least {} confirmations - {} confirmations",
                required, confirmations
            ),
            confirmations,
        )
    }
}
