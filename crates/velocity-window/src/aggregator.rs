//! Velocity Aggregator

use crate::window::WindowQueue;
use crate::{OrderingError, VelocityFeatures};
use data_validator::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Role an account plays in a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountRole {
    /// Sender
    Origin,
    /// Receiver
    Destination,
}

/// Window-state key. The same account id holds independent state per role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    pub role: AccountRole,
    pub account: String,
}

impl AccountKey {
    pub fn new(role: AccountRole, account: impl Into<String>) -> Self {
        Self {
            role,
            account: account.into(),
        }
    }

    /// Keys touched by a transaction, origin first
    pub fn for_transaction(tx: &Transaction) -> [AccountKey; 2] {
        [
            AccountKey::new(AccountRole::Origin, tx.name_orig.as_str()),
            AccountKey::new(AccountRole::Destination, tx.name_dest.as_str()),
        ]
    }
}

/// Read the pre-update window for one key, then record the current entry
pub(crate) fn observe(queue: &mut WindowQueue, window_size: u32, step: u32, amount: f64) -> (u32, f64) {
    queue.evict_before(step.saturating_sub(window_size));
    let seen = (queue.len() as u32, queue.sum());
    queue.push(step, amount);
    seen
}

/// Rolling per-account velocity state for one processing run
#[derive(Debug)]
pub struct VelocityAggregator {
    /// Window size in steps
    window_size: u32,
    /// Sender-side windows by account id
    origins: HashMap<String, WindowQueue>,
    /// Receiver-side windows by account id
    destinations: HashMap<String, WindowQueue>,
    /// Step of the last accepted transaction
    last_step: Option<u32>,
    /// Transactions accepted so far
    processed: u64,
}

impl VelocityAggregator {
    /// Create an aggregator with the given window size (in steps)
    pub fn new(window_size: u32) -> Self {
        debug!(window_size, "Creating velocity aggregator");
        Self {
            window_size,
            origins: HashMap::new(),
            destinations: HashMap::new(),
            last_step: None,
            processed: 0,
        }
    }

    /// Advance by one transaction and return its causal velocity features.
    ///
    /// Transactions must arrive in non-decreasing step order. An out-of-order
    /// transaction is rejected before any state is touched.
    pub fn advance(&mut self, tx: &Transaction) -> Result<VelocityFeatures, OrderingError> {
        if let Some(previous_step) = self.last_step {
            if tx.step < previous_step {
                return Err(OrderingError {
                    transaction_id: tx.transaction_id.clone(),
                    previous_step,
                    step: tx.step,
                });
            }
        }
        self.last_step = Some(tx.step);
        self.processed += 1;

        let (orig_count, orig_amount) = observe(
            window_for(&mut self.origins, &tx.name_orig),
            self.window_size,
            tx.step,
            tx.amount,
        );
        let (dest_count, dest_amount) = observe(
            window_for(&mut self.destinations, &tx.name_dest),
            self.window_size,
            tx.step,
            tx.amount,
        );

        Ok(VelocityFeatures {
            orig_count,
            orig_amount,
            dest_count,
            dest_amount,
        })
    }

    /// Advance over a whole ordered batch
    pub fn advance_all(&mut self, txs: &[Transaction]) -> Result<Vec<VelocityFeatures>, OrderingError> {
        txs.iter().map(|tx| self.advance(tx)).collect()
    }

    /// Window size in steps
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Number of account-role keys with state
    pub fn tracked_accounts(&self) -> usize {
        self.origins.len() + self.destinations.len()
    }

    /// Transactions accepted since creation or the last reset
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Last accepted step
    pub fn last_step(&self) -> Option<u32> {
        self.last_step
    }

    /// Discard all run state
    pub fn reset(&mut self) {
        info!(
            processed = self.processed,
            accounts = self.tracked_accounts(),
            "Discarding velocity window state"
        );
        self.origins.clear();
        self.destinations.clear();
        self.last_step = None;
        self.processed = 0;
    }
}

fn window_for<'a>(states: &'a mut HashMap<String, WindowQueue>, account: &str) -> &'a mut WindowQueue {
    states.entry(account.to_string()).or_default()
}
