//! Budget cycle arithmetic

use govnode_core::{Amount, ChainParams, ChainView};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Blocks a finalized budget may span, and payments a proposal may ask for
pub const MAX_BUDGET_PAYMENTS: i64 = 100;

/// Cycles whose budget total is remembered
const CACHED_TOTALS: usize = 8;

/// Budget totals by cycle start, so validation does not re-sum a cycle's
/// subsidies for every object
#[derive(Debug, Default)]
pub struct BudgetTotals {
    totals: Mutex<BTreeMap<i64, Amount>>,
}

impl BudgetTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.totals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.lock().is_empty()
    }

    fn get(&self, height: i64) -> Option<Amount> {
        self.totals.lock().get(&height).copied()
    }

    fn insert(&self, height: i64, total: Amount) {
        let mut totals = self.totals.lock();
        totals.insert(height, total);
        while totals.len() > CACHED_TOTALS {
            totals.pop_first();
        }
    }
}

/// Cycle boundaries and budget caps over one chain
#[derive(Clone, Copy)]
pub struct Cycle<'a> {
    pub params: &'a ChainParams,
    pub chain: &'a dyn ChainView,
    totals: Option<&'a BudgetTotals>,
}

impl<'a> Cycle<'a> {
    pub fn new(params: &'a ChainParams, chain: &'a dyn ChainView) -> Self {
        Self {
            params,
            chain,
            totals: None,
        }
    }

    /// Remember budget totals in `totals`
    pub fn with_totals(self, totals: &'a BudgetTotals) -> Self {
        Self {
            totals: Some(totals),
            ..self
        }
    }

    pub fn blocks(&self) -> i64 {
        self.params.budget_cycle_blocks
    }

    /// First height of the cycle containing `height`
    pub fn start_of(&self, height: i64) -> i64 {
        height - height % self.blocks()
    }

    /// First height of the cycle after the one containing `height`
    pub fn next_start(&self, height: i64) -> i64 {
        self.params.next_cycle_start(height)
    }

    /// A tenth of the subsidy minted over the cycle starting at `height`
    pub fn total_budget(&self, height: i64) -> Amount {
        if let Some(total) = self.totals.and_then(|totals| totals.get(height)) {
            return total;
        }
        let last_pow = self.params.last_pow_block;
        let subsidy: Amount = (height..height + self.blocks())
            .map(|h| self.chain.block_subsidy(h, h > last_pow))
            .sum();
        let total = subsidy / 10;
        if let Some(totals) = self.totals {
            totals.insert(height, total);
        }
        total
    }
}

/// Network conditions objects are validated against
pub struct Validation<'a> {
    pub cycle: Cycle<'a>,
    pub tip: Option<i64>,
    /// Enabled masternodes on the current protocol
    pub enabled: usize,
    pub check_collateral: bool,
}
