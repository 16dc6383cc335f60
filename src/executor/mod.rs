//! Block execution strategies.
//!
//! This module provides the [`Executor`] trait and its two implementations:
//! the sequential reference and the optimistic parallel executor. Both run
//! the same handlers over the same store and must produce the same result.

mod occ;
mod sequential;

pub use occ::OccExecutor;
pub use sequential::SequentialExecutor;

use crate::{AccountStore, NodeError};
use occ_executor::{BlockOutput, Transaction};

/// Result of executing a block.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Number of transactions that returned a response.
    pub successful: usize,
    /// Number of transactions that returned an application error.
    pub failed: usize,
    /// Responses, committed diff and statistics.
    pub output: BlockOutput,
}

impl ExecutionResult {
    pub fn new(output: BlockOutput) -> Self {
        Self {
            successful: output.successful(),
            failed: output.failed(),
            output,
        }
    }

    /// Total number of transactions processed.
    pub fn total(&self) -> usize {
        self.successful + self.failed
    }
}

/// Strategy for executing a block against an [`AccountStore`].
///
/// The store is consumed and handed back with the block's diff committed.
/// On error the block is discarded and no store is returned.
pub trait Executor {
    fn execute(
        &self,
        store: AccountStore,
        transactions: &[Transaction],
    ) -> Result<(AccountStore, ExecutionResult), NodeError>;

    /// Returns a human-readable name for this executor.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
