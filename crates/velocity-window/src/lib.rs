//! Windowed Velocity Aggregation
//!
//! Maintains per-account rolling counts and sums over a trailing window of
//! time steps and emits velocity features causally: a transaction never sees
//! its own amount, nor anything from a later step.

mod aggregator;
mod partitioned;
mod window;

pub use aggregator::{AccountKey, AccountRole, VelocityAggregator};
pub use partitioned::aggregate_partitioned;
pub use window::WindowQueue;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default window, in steps (one step per simulated hour)
pub const DEFAULT_WINDOW_SIZE: u32 = 1;

/// Velocity features attributed to a single transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityFeatures {
    /// Prior transactions sent by the origin account within the window
    pub orig_count: u32,
    /// Prior amount sent by the origin account within the window
    pub orig_amount: f64,
    /// Prior transactions received by the destination account within the window
    pub dest_count: u32,
    /// Prior amount received by the destination account within the window
    pub dest_amount: f64,
}

/// Input presented out of step order. Not retryable: the upstream data is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transaction {transaction_id} at step {step} arrived after step {previous_step}")]
pub struct OrderingError {
    pub transaction_id: String,
    pub previous_step: u32,
    pub step: u32,
}
