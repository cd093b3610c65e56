//! Per-block vote tally

use crate::quorum::SIGNATURES_REQUIRED;
use govnode_core::{Amount, Script, Transaction};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub script: Script,
    pub votes: u32,
}

/// Every payee voted for at one height, with its vote count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayees {
    pub block_height: i64,
    pub payments: Vec<Payee>,
}

impl BlockPayees {
    pub fn new(block_height: i64) -> Self {
        Self {
            block_height,
            payments: Vec::new(),
        }
    }

    pub fn add_payee(&mut self, script: &Script, increment: u32) {
        if let Some(payee) = self.payments.iter_mut().find(|p| p.script == *script) {
            payee.votes += increment;
            return;
        }
        self.payments.push(Payee {
            script: script.clone(),
            votes: increment,
        });
    }

    /// Most voted payee; the earliest recorded wins a tie
    pub fn payee(&self) -> Option<Script> {
        let mut best: Option<&Payee> = None;
        for p in &self.payments {
            if best.map(|b| p.votes > b.votes).unwrap_or(true) {
                best = Some(p);
            }
        }
        best.map(|p| p.script.clone())
    }

    pub fn has_payee_with_votes(&self, script: &Script, votes_required: u32) -> bool {
        self.payments
            .iter()
            .any(|p| p.votes >= votes_required && p.script == *script)
    }

    /// Without a quorum payee anything goes; otherwise one quorum payee
    /// must receive at least `required`
    pub fn is_transaction_valid(&self, tx: &Transaction, required: Amount) -> bool {
        let max_signatures = self
            .payments
            .iter()
            .map(|p| p.votes)
            .filter(|v| *v >= SIGNATURES_REQUIRED)
            .max()
            .unwrap_or(0);
        if max_signatures < SIGNATURES_REQUIRED {
            return true;
        }

        let mut possible = Vec::new();
        for payee in &self.payments {
            let mut found = false;
            for out in tx.outputs.iter().filter(|o| o.script == payee.script) {
                if out.value >= required {
                    found = true;
                } else {
                    debug!(
                        target: "mnpayments",
                        "Masternode payment is out of drift range. Paid={} Min={}",
                        out.value, required
                    );
                }
            }

            if payee.votes >= SIGNATURES_REQUIRED {
                if found {
                    return true;
                }
                possible.push(payee.script.to_address());
            }
        }

        warn!(
            target: "mnpayments",
            "Missing required payment of {} to {}",
            required,
            possible.join(",")
        );
        false
    }

    /// `"addr:votes, addr:votes"`, or `"Unknown"` when nobody was voted for
    pub fn required_payments_string(&self) -> String {
        if self.payments.is_empty() {
            return "Unknown".to_string();
        }
        self.payments
            .iter()
            .map(|p| format!("{}:{}", p.script.to_address(), p.votes))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
