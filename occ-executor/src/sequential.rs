//! Sequential reference execution.

use crate::error::{EngineError, HandlerError};
use crate::handler::HandlerRegistry;
use crate::state::StateView;
use crate::types::{BlockOutput, ExecutionStats, Transaction, TxnIndex};
use crate::view::SequentialView;
use std::time::Instant;
use tracing::debug;

/// Executes the block one transaction at a time, in order.
///
/// Each transaction sees the writes of every earlier one, including the
/// partial writes of those that failed. This is the oracle the parallel
/// executor must match.
pub fn execute_block_sequential<S: StateView>(
    registry: &HandlerRegistry,
    transactions: &[Transaction],
    base: &S,
) -> Result<BlockOutput, EngineError> {
    let start = Instant::now();
    let mut output = BlockOutput {
        responses: Vec::with_capacity(transactions.len()),
        ..Default::default()
    };

    for (idx, tx) in transactions.iter().enumerate() {
        let mut view = SequentialView::new(idx as TxnIndex, &output.write_set, base);
        let response = match registry.dispatch(tx, &mut view) {
            Ok(response) => Ok(response),
            Err(HandlerError::App(err)) => Err(err),
            Err(HandlerError::Read(err)) => return Err(err.into()),
        };
        let writes = view.into_write_set();
        output.write_set.extend(writes);
        output.responses.push(response);
    }

    output.stats = ExecutionStats {
        executions: transactions.len(),
        ..Default::default()
    };
    debug!(
        target: "occ",
        num_txns = transactions.len(),
        elapsed = ?start.elapsed(),
        "Finished sequential block execution"
    );
    Ok(output)
}
