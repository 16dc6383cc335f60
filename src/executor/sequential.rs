//! Sequential reference executor.

use super::{ExecutionResult, Executor};
use crate::handlers::{registry, TransferConfig};
use crate::{AccountStore, NodeError};
use occ_executor::{execute_block_sequential, CommitStore, HandlerRegistry, Transaction};
use std::sync::Arc;

/// Executes transactions one at a time in block order.
///
/// This is the baseline every parallel run is compared against.
///
/// # Example
///
/// ```
/// use occ_node::{Executor, SequentialExecutor, TransferConfig, Workload, WorkloadConfig};
///
/// let workload = Workload::generate(WorkloadConfig {
///     num_accounts: 10,
///     num_transactions: 5,
///     ..Default::default()
/// })
/// .unwrap();
///
/// let executor = SequentialExecutor::new(TransferConfig::default());
/// let (_store, result) = executor.execute(workload.create_store(), &workload.transactions).unwrap();
/// assert_eq!(result.successful, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SequentialExecutor {
    registry: Arc<HandlerRegistry>,
}

impl SequentialExecutor {
    pub fn new(config: TransferConfig) -> Self {
        Self::with_registry(Arc::new(registry(config)))
    }

    pub fn with_registry(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

impl Executor for SequentialExecutor {
    fn execute(
        &self,
        mut store: AccountStore,
        transactions: &[Transaction],
    ) -> Result<(AccountStore, ExecutionResult), NodeError> {
        let output = execute_block_sequential(&self.registry, transactions, &store)?;
        store.commit(&output.write_set)?;
        Ok((store, ExecutionResult::new(output)))
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
