//! Parallel block executor.

use crate::commit::CommitSequencer;
use crate::error::{EngineError, HandlerError, ReadError};
use crate::handler::HandlerRegistry;
use crate::mvs::MultiVersionStore;
use crate::scheduler::{Scheduler, Task, Wave};
use crate::state::StateView;
use crate::types::{BlockOutput, ExecutionResult, ExecutionStats, Transaction, TxnIndex, Version};
use crate::validator::{ValidationOutcome, Validator};
use crate::view::VersionedView;
use crossbeam::utils::Backoff;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Configuration for parallel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    pub num_threads: usize,
}

impl ExecutorConfig {
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.num_threads == 0 {
            return Err(EngineError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Everything shared by the workers of one block. Built when the block starts
/// and dropped when it ends.
struct EngineState<'a, S: StateView> {
    transactions: &'a [Transaction],
    base: &'a S,
    registry: &'a HandlerRegistry,
    mvs: MultiVersionStore,
    scheduler: Scheduler,
    sequencer: CommitSequencer,
}

/// Parallel optimistic executor.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
    registry: Arc<HandlerRegistry>,
}

impl ParallelExecutor {
    /// Creates a new parallel executor.
    pub fn new(config: ExecutorConfig, registry: Arc<HandlerRegistry>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Executes a block of transactions against `base`.
    ///
    /// The outputs are exactly those of executing the block one transaction
    /// at a time in order, for any number of threads.
    pub fn execute_block<S: StateView>(
        &self,
        transactions: &[Transaction],
        base: &S,
    ) -> Result<BlockOutput, EngineError> {
        let start = Instant::now();
        let num_txns = transactions.len();
        check_block_len(num_txns)?;
        let num_threads = self.config.num_threads.min(num_txns.max(1));

        debug!(
            target: "occ",
            num_txns,
            num_threads,
            "Starting parallel block execution"
        );

        let state = EngineState {
            transactions,
            base,
            registry: &self.registry,
            mvs: MultiVersionStore::new(num_txns),
            scheduler: Scheduler::new(num_txns),
            sequencer: CommitSequencer::new(num_txns),
        };

        let results: Vec<Result<ExecutionStats, EngineError>> = thread::scope(|s| {
            let handles: Vec<_> = (0..num_threads)
                .map(|worker_id| {
                    let state = &state;
                    s.spawn(move || worker_loop(worker_id, state))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker_id, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        state.scheduler.halt();
                        Err(EngineError::WorkerPanicked { worker_id })
                    })
                })
                .collect()
        });

        let mut stats = ExecutionStats::default();
        let mut fault = None;
        for result in results {
            match result {
                Ok(worker_stats) => stats.merge(&worker_stats),
                // Secondary workers only report that they were halted
                Err(EngineError::Halted) => {}
                Err(err) => {
                    fault.get_or_insert(err);
                }
            }
        }
        if let Some(err) = fault {
            warn!(target: "occ", error = %err, "Block execution failed");
            return Err(err);
        }
        if state.scheduler.is_halted() {
            return Err(EngineError::Halted);
        }

        let committed = state.sequencer.committed_count() as usize;
        if committed != num_txns {
            return Err(EngineError::MissingResult {
                txn_idx: committed as u32,
            });
        }

        let (responses, write_set) = state.sequencer.into_output();
        debug!(
            target: "occ",
            num_txns,
            executions = stats.executions,
            aborts = stats.aborts,
            validations = stats.validations,
            dependency_waits = stats.dependency_waits,
            elapsed = ?start.elapsed(),
            "Finished parallel block execution"
        );

        Ok(BlockOutput {
            responses,
            write_set,
            stats,
        })
    }
}

/// Largest block the parallel executor accepts. Indices must fit in a
/// [`TxnIndex`] with room for the validation cursor to run past the end.
pub const MAX_BLOCK_TXNS: usize = (TxnIndex::MAX / 2) as usize;

fn check_block_len(num_txns: usize) -> Result<(), EngineError> {
    if num_txns > MAX_BLOCK_TXNS {
        return Err(EngineError::InvalidConfig(format!(
            "block of {num_txns} transactions exceeds the limit of {MAX_BLOCK_TXNS}"
        )));
    }
    Ok(())
}

/// Convenience wrapper: executes `transactions` with `parallelism` workers.
pub fn execute_block<S: StateView>(
    registry: Arc<HandlerRegistry>,
    transactions: &[Transaction],
    base: &S,
    parallelism: usize,
) -> Result<BlockOutput, EngineError> {
    ParallelExecutor::new(ExecutorConfig::new(parallelism), registry)?.execute_block(transactions, base)
}

/// Worker thread main loop. The first engine fault halts the whole block.
fn worker_loop<S: StateView>(
    worker_id: usize,
    state: &EngineState<'_, S>,
) -> Result<ExecutionStats, EngineError> {
    let mut stats = ExecutionStats::default();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_worker(state, &mut stats)))
        .unwrap_or(Err(EngineError::WorkerPanicked { worker_id }));
    match outcome {
        Ok(()) => Ok(stats),
        Err(EngineError::Halted) => Err(EngineError::Halted),
        Err(err) => {
            warn!(target: "occ", worker_id, error = %err, "Engine fault, halting block");
            state.scheduler.halt();
            Err(err)
        }
    }
}

fn run_worker<S: StateView>(
    state: &EngineState<'_, S>,
    stats: &mut ExecutionStats,
) -> Result<(), EngineError> {
    let backoff = Backoff::new();
    let mut task: Option<Task> = None;

    while !state.scheduler.done() {
        task = match task.take().or_else(|| state.scheduler.next_task()) {
            Some(Task::Execute(version)) => {
                backoff.reset();
                execute(version, state, stats)?
            }
            Some(Task::Validate { version, wave }) => {
                backoff.reset();
                validate(version, wave, state, stats)?
            }
            None => {
                if state.sequencer.try_commit(&state.scheduler)? == 0 {
                    backoff.snooze();
                }
                None
            }
        };

        if task.is_none() {
            state.sequencer.try_commit(&state.scheduler)?;
        }
    }

    if state.scheduler.is_halted() {
        return Err(EngineError::Halted);
    }
    Ok(())
}

/// Runs one incarnation and publishes its result.
fn execute<S: StateView>(
    version: Version,
    state: &EngineState<'_, S>,
    stats: &mut ExecutionStats,
) -> Result<Option<Task>, EngineError> {
    let Version {
        txn_idx,
        incarnation,
    } = version;
    let tx = &state.transactions[txn_idx as usize];
    stats.executions += 1;

    let mut view = VersionedView::new(version, &state.mvs, &state.scheduler, state.base);
    let output = match state.registry.dispatch(tx, &mut view) {
        Ok(response) => Ok(Ok(response)),
        Err(HandlerError::App(err)) => Ok(Err(err)),
        // May come from a stale attempt; surfaced only if this version commits
        Err(HandlerError::Read(ReadError::Storage(err))) => {
            debug!(target: "occ", %version, error = %err, "Storage failure during execution");
            Err(err)
        }
        Err(HandlerError::Read(ReadError::Halted)) => return Err(EngineError::Halted),
        Err(HandlerError::Read(err)) => return Err(err.into()),
    };
    let (read_set, write_set, dependency_waits) = view.finish();
    stats.dependency_waits += dependency_waits;

    let wrote_new_location = state.mvs.record(version, read_set.clone(), &write_set);
    state.sequencer.store(ExecutionResult {
        version,
        read_set,
        write_set,
        output,
    });

    trace!(
        target: "occ",
        %version,
        wrote_new_location,
        "Executed transaction"
    );
    state
        .scheduler
        .finish_execution(txn_idx, incarnation, wrote_new_location)
}

/// Validates one incarnation, aborting it on conflict.
fn validate<S: StateView>(
    version: Version,
    wave: Wave,
    state: &EngineState<'_, S>,
    stats: &mut ExecutionStats,
) -> Result<Option<Task>, EngineError> {
    stats.validations += 1;

    match Validator::new(&state.mvs).validate(version) {
        ValidationOutcome::Valid => {
            state
                .scheduler
                .finish_validation(version.txn_idx, version.incarnation, wave);
            Ok(None)
        }
        ValidationOutcome::Stale => Ok(None),
        ValidationOutcome::Conflict(conflict) => {
            if !state
                .scheduler
                .try_validation_abort(version.txn_idx, version.incarnation)
            {
                return Ok(None);
            }
            stats.aborts += 1;
            trace!(
                target: "occ",
                %version,
                key = %conflict.key,
                observed = ?conflict.observed,
                current = ?conflict.current,
                "Validation failed, aborting"
            );
            state.mvs.mark_estimate(version.txn_idx);
            state
                .scheduler
                .finish_abort(version.txn_idx, version.incarnation)
                .map(Some)
        }
    }
}
