//! Optimistic parallel executor.

use super::{ExecutionResult, Executor};
use crate::handlers::{registry, TransferConfig};
use crate::{AccountStore, NodeError};
use occ_executor::{CommitStore, ExecutorConfig, HandlerRegistry, ParallelExecutor, Transaction};
use std::sync::Arc;
use tracing::info;

/// Executes a block with optimistic concurrency control.
///
/// Transactions run speculatively on `num_threads` workers, are validated
/// against later writes and re-executed on conflict. The committed result
/// is identical to [`SequentialExecutor`](super::SequentialExecutor).
#[derive(Debug, Clone)]
pub struct OccExecutor {
    inner: ParallelExecutor,
}

impl OccExecutor {
    /// Creates an executor with the default handler set.
    pub fn new(num_threads: usize, config: TransferConfig) -> Result<Self, NodeError> {
        Self::with_registry(num_threads, Arc::new(registry(config)))
    }

    pub fn with_registry(
        num_threads: usize,
        registry: Arc<HandlerRegistry>,
    ) -> Result<Self, NodeError> {
        let inner = ParallelExecutor::new(ExecutorConfig::new(num_threads), registry)?;
        Ok(Self { inner })
    }

    pub fn num_threads(&self) -> usize {
        self.inner.config().num_threads
    }
}

impl Executor for OccExecutor {
    fn execute(
        &self,
        mut store: AccountStore,
        transactions: &[Transaction],
    ) -> Result<(AccountStore, ExecutionResult), NodeError> {
        let output = self.inner.execute_block(transactions, &store)?;
        store.commit(&output.write_set)?;

        let stats = &output.stats;
        info!(
            target: "occ",
            txs = transactions.len(),
            threads = self.num_threads(),
            executions = stats.executions,
            aborts = stats.aborts,
            "Executed block"
        );
        Ok((store, ExecutionResult::new(output)))
    }

    fn name(&self) -> &'static str {
        "occ_parallel"
    }
}
