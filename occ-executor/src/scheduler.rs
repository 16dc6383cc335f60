//! Scheduler coordinating speculative execution, ordered validation and commit.
//!
//! Two atomic cursors act as the ready queues: `execution_idx` hands out first
//! incarnations in index order and `validation_idx` sweeps validations in
//! ascending index order. The validation cursor is packed with a wave counter;
//! every time it is pulled back (an abort, or a re-execution writing a new
//! key) the wave is bumped, and a transaction can only commit with a
//! validation stamped at a wave that postdates every pull-back at or below its
//! index. That is what makes a provisionally validated transaction reopenable
//! until everything below it is final.
//!
//! Workers that hit an estimate park on a per-reader condition variable that
//! is registered with the writer and woken when the writer's next incarnation
//! finishes. Readers only ever wait on strictly lower indices.

use crate::error::{EngineError, ReadError};
use crate::types::{ExecutionStatus, Incarnation, TxnIndex, Version};
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cmp::max;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Validation wave counter.
pub type Wave = u32;

/// Task for a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Execute a transaction at a specific incarnation.
    Execute(Version),
    /// Validate the given incarnation; the wave stamps when it was handed out.
    Validate { version: Version, wave: Wave },
}

/// State of one parked reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Unresolved,
    Resolved,
    Halted,
}

/// Condition variable a reader parks on while its writer is unresolved.
pub type DependencyCondvar = Arc<(Mutex<DependencyStatus>, Condvar)>;

/// Outcome of registering a dependency on a writer.
#[derive(Debug)]
pub enum DependencyResult {
    /// The writer already finished its new incarnation; read again.
    Resolved,
    /// Park on this until the writer resolves.
    Wait(DependencyCondvar),
    /// The block was halted.
    Halted,
}

/// Blocks the calling thread until the dependency is resolved or the block halts.
pub fn wait_on(condvar: &DependencyCondvar) -> DependencyStatus {
    let (lock, cvar) = &**condvar;
    let mut status = lock.lock();
    while *status == DependencyStatus::Unresolved {
        cvar.wait(&mut status);
    }
    *status
}

fn notify(condvar: &DependencyCondvar, status: DependencyStatus) {
    let (lock, cvar) = &**condvar;
    *lock.lock() = status;
    cvar.notify_all();
}

#[derive(Debug)]
struct TxnState {
    status: ExecutionStatus,
    /// Readers parked on this transaction's estimates.
    dependents: Vec<DependencyCondvar>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ValidationStatus {
    /// Highest wave of a validation-cursor pull-back targeted at this index.
    max_triggered_wave: Wave,
    /// Wave current when the latest incarnation finished executing.
    required_wave: Wave,
    /// Highest wave at which the latest incarnation passed validation.
    max_validated_wave: Option<Wave>,
}

#[derive(Debug, Default)]
struct CommitState {
    commit_idx: TxnIndex,
    commit_wave: Wave,
}

fn pack_validation_idx(idx: TxnIndex, wave: Wave) -> u64 {
    ((wave as u64) << 32) | idx as u64
}

fn unpack_validation_idx(packed: u64) -> (TxnIndex, Wave) {
    ((packed & 0xFFFF_FFFF) as TxnIndex, (packed >> 32) as Wave)
}

/// Per-block scheduler state.
pub struct Scheduler {
    num_txns: TxnIndex,
    execution_idx: AtomicUsize,
    /// Packed (wave, index).
    validation_idx: AtomicU64,
    txn_state: Vec<CachePadded<Mutex<TxnState>>>,
    validation_status: Vec<CachePadded<Mutex<ValidationStatus>>>,
    commit_state: Mutex<CommitState>,
    done_marker: AtomicBool,
    halted: AtomicBool,
}

impl Scheduler {
    /// Creates a scheduler with every transaction pending its first incarnation.
    pub fn new(num_txns: usize) -> Self {
        Self {
            num_txns: num_txns as TxnIndex,
            execution_idx: AtomicUsize::new(0),
            validation_idx: AtomicU64::new(0),
            txn_state: std::iter::repeat_with(|| {
                CachePadded::new(Mutex::new(TxnState {
                    status: ExecutionStatus::Pending(0),
                    dependents: Vec::new(),
                }))
            })
            .take(num_txns)
            .collect(),
            validation_status: std::iter::repeat_with(|| {
                CachePadded::new(Mutex::new(ValidationStatus::default()))
            })
            .take(num_txns)
            .collect(),
            commit_state: Mutex::new(CommitState::default()),
            done_marker: AtomicBool::new(num_txns == 0),
            halted: AtomicBool::new(false),
        }
    }

    /// Total number of transactions in the block.
    pub fn num_txns(&self) -> usize {
        self.num_txns as usize
    }

    /// True once every transaction committed, or the block was halted.
    pub fn done(&self) -> bool {
        self.done_marker.load(Ordering::Acquire)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Gets the current status of a transaction.
    pub fn status(&self, txn_idx: TxnIndex) -> ExecutionStatus {
        self.txn_state[txn_idx as usize].lock().status
    }

    /// Number of committed transactions (the committed prefix length).
    pub fn commit_idx(&self) -> TxnIndex {
        self.commit_state.lock().commit_idx
    }

    /// Current position of the validation cursor.
    pub fn validation_idx(&self) -> TxnIndex {
        unpack_validation_idx(self.validation_idx.load(Ordering::SeqCst)).0
    }

    /// Current validation wave.
    pub fn wave(&self) -> Wave {
        unpack_validation_idx(self.validation_idx.load(Ordering::SeqCst)).1
    }

    /// Gets the next task for a worker thread. Validation has priority over
    /// fresh executions whenever it lags behind.
    pub fn next_task(&self) -> Option<Task> {
        if self.done() {
            return None;
        }

        let (val_idx, _) = unpack_validation_idx(self.validation_idx.load(Ordering::SeqCst));
        let exec_idx = self.execution_idx.load(Ordering::SeqCst);

        if (val_idx as usize) < exec_idx.min(self.num_txns as usize) {
            self.next_version_to_validate()
        } else if exec_idx < self.num_txns as usize {
            self.next_version_to_execute()
        } else {
            None
        }
    }

    fn next_version_to_execute(&self) -> Option<Task> {
        let idx = self.execution_idx.fetch_add(1, Ordering::SeqCst);
        if idx >= self.num_txns as usize {
            return None;
        }
        self.try_incarnate(idx as TxnIndex).map(Task::Execute)
    }

    fn next_version_to_validate(&self) -> Option<Task> {
        let packed = self.validation_idx.fetch_add(1, Ordering::SeqCst);
        let (idx, wave) = unpack_validation_idx(packed);
        if idx >= self.num_txns {
            return None;
        }

        match self.txn_state[idx as usize].lock().status {
            ExecutionStatus::Executed(incarnation) => Some(Task::Validate {
                version: Version::new(idx, incarnation),
                wave,
            }),
            // Still executing: finish_execution hands out the validation.
            _ => None,
        }
    }

    fn try_incarnate(&self, txn_idx: TxnIndex) -> Option<Version> {
        let mut state = self.txn_state[txn_idx as usize].lock();
        if let ExecutionStatus::Pending(incarnation) = state.status {
            state.status = ExecutionStatus::Executing(incarnation);
            return Some(Version::new(txn_idx, incarnation));
        }
        None
    }

    /// Pulls the validation cursor back to `target_idx`, bumping the wave.
    /// Returns the new wave, or `None` if the cursor was already at or below.
    fn decrease_validation_idx(&self, target_idx: TxnIndex) -> Option<Wave> {
        self.validation_idx
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |packed| {
                let (idx, wave) = unpack_validation_idx(packed);
                (idx > target_idx).then(|| pack_validation_idx(target_idx, wave + 1))
            })
            .ok()
            .map(|prev| unpack_validation_idx(prev).1 + 1)
    }

    /// Registers `reader` as blocked on the unresolved writes of `writer`.
    pub fn wait_for_dependency(
        &self,
        reader: TxnIndex,
        writer: TxnIndex,
    ) -> Result<DependencyResult, ReadError> {
        if writer >= reader || writer >= self.num_txns {
            return Err(ReadError::DependencyCycle { reader, writer });
        }

        let mut state = self.txn_state[writer as usize].lock();
        if self.is_halted() {
            return Ok(DependencyResult::Halted);
        }
        match state.status {
            ExecutionStatus::Executed(_) | ExecutionStatus::Committed(_) => {
                Ok(DependencyResult::Resolved)
            }
            _ => {
                let condvar: DependencyCondvar = Arc::new((
                    Mutex::new(DependencyStatus::Unresolved),
                    Condvar::new(),
                ));
                state.dependents.push(Arc::clone(&condvar));
                Ok(DependencyResult::Wait(condvar))
            }
        }
    }

    /// Marks an incarnation executed and wakes every reader parked on it.
    ///
    /// `wrote_new_location` forces revalidation of every higher transaction.
    /// Returns a validation task for the same transaction when the validation
    /// cursor has already passed it.
    pub fn finish_execution(
        &self,
        txn_idx: TxnIndex,
        incarnation: Incarnation,
        wrote_new_location: bool,
    ) -> Result<Option<Task>, EngineError> {
        let mut validation = self.validation_status[txn_idx as usize].lock();
        {
            let mut state = self.txn_state[txn_idx as usize].lock();
            if state.status != ExecutionStatus::Executing(incarnation) {
                return Err(EngineError::InvalidStatus {
                    txn_idx,
                    status: state.status,
                    operation: "finish_execution",
                });
            }
            state.status = ExecutionStatus::Executed(incarnation);
            for dependent in state.dependents.drain(..) {
                notify(&dependent, DependencyStatus::Resolved);
            }
        }

        let (val_idx, mut wave) = unpack_validation_idx(self.validation_idx.load(Ordering::SeqCst));
        let mut task = None;
        if val_idx > txn_idx {
            if wrote_new_location {
                if let Some(new_wave) = self.decrease_validation_idx(txn_idx) {
                    wave = new_wave;
                    validation.max_triggered_wave = max(validation.max_triggered_wave, new_wave);
                }
            } else {
                task = Some(Task::Validate {
                    version: Version::new(txn_idx, incarnation),
                    wave,
                });
            }
        }
        validation.required_wave = wave;
        validation.max_validated_wave = None;

        Ok(task)
    }

    /// Claims the right to abort an incarnation after a failed validation.
    /// Only one validator can win for a given incarnation.
    pub fn try_validation_abort(&self, txn_idx: TxnIndex, incarnation: Incarnation) -> bool {
        let mut state = self.txn_state[txn_idx as usize].lock();
        if state.status == ExecutionStatus::Executed(incarnation) {
            state.status = ExecutionStatus::Aborting(incarnation);
            return true;
        }
        false
    }

    /// Completes an abort: schedules revalidation of every higher transaction
    /// and hands the next incarnation straight back to the aborting worker.
    ///
    /// The caller must have marked the aborted writes as estimates first.
    pub fn finish_abort(
        &self,
        txn_idx: TxnIndex,
        incarnation: Incarnation,
    ) -> Result<Task, EngineError> {
        let successor = txn_idx + 1;
        if let Some(wave) = self.decrease_validation_idx(successor) {
            if successor < self.num_txns {
                let mut validation = self.validation_status[successor as usize].lock();
                validation.max_triggered_wave = max(validation.max_triggered_wave, wave);
            }
        }

        let mut state = self.txn_state[txn_idx as usize].lock();
        if state.status != ExecutionStatus::Aborting(incarnation) {
            return Err(EngineError::InvalidStatus {
                txn_idx,
                status: state.status,
                operation: "finish_abort",
            });
        }
        let next = incarnation + 1;
        state.status = ExecutionStatus::Executing(next);
        Ok(Task::Execute(Version::new(txn_idx, next)))
    }

    /// Records a passed validation of an incarnation at the given wave.
    pub fn finish_validation(&self, txn_idx: TxnIndex, incarnation: Incarnation, wave: Wave) {
        let mut validation = self.validation_status[txn_idx as usize].lock();
        let state = self.txn_state[txn_idx as usize].lock();
        if state.status == ExecutionStatus::Executed(incarnation) {
            validation.max_validated_wave =
                Some(validation.max_validated_wave.map_or(wave, |w| max(w, wave)));
        }
    }

    /// Commits the lowest uncommitted transaction if it is final.
    ///
    /// Callers must serialize calls; the commit sequencer does.
    pub fn try_commit(&self) -> Option<Version> {
        let mut commit = self.commit_state.lock();
        if commit.commit_idx >= self.num_txns {
            return None;
        }

        let idx = commit.commit_idx as usize;
        let validation = self.validation_status[idx].lock();
        let mut state = self.txn_state[idx].lock();

        let ExecutionStatus::Executed(incarnation) = state.status else {
            return None;
        };
        commit.commit_wave = max(commit.commit_wave, validation.max_triggered_wave);
        let validated_wave = validation.max_validated_wave?;
        if validated_wave < max(commit.commit_wave, validation.required_wave) {
            return None;
        }

        state.status = ExecutionStatus::Committed(incarnation);
        commit.commit_idx += 1;
        if commit.commit_idx == self.num_txns {
            self.done_marker.store(true, Ordering::Release);
        }
        Some(Version::new(idx as TxnIndex, incarnation))
    }

    /// Stops the block: workers exit and every parked reader is woken.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.done_marker.store(true, Ordering::SeqCst);
        for state in &self.txn_state {
            let mut state = state.lock();
            for dependent in state.dependents.drain(..) {
                notify(&dependent, DependencyStatus::Halted);
            }
        }
    }
}
