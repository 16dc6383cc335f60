//! Commit sequencer: finalizes transactions strictly in block order.

use crate::error::EngineError;
use crate::scheduler::Scheduler;
use crate::types::{ExecutionResult, TxOutput, TxnIndex, WriteSet};
use parking_lot::Mutex;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct Committed {
    responses: Vec<TxOutput>,
    write_set: WriteSet,
}

/// Holds the latest execution result of every index and drains them into the
/// block's ordered responses and committed diff as the scheduler finalizes
/// each one.
#[derive(Debug)]
pub struct CommitSequencer {
    results: Vec<Mutex<Option<ExecutionResult>>>,
    committed: Mutex<Committed>,
}

impl CommitSequencer {
    pub fn new(num_txns: usize) -> Self {
        Self {
            results: std::iter::repeat_with(|| Mutex::new(None))
                .take(num_txns)
                .collect(),
            committed: Mutex::new(Committed {
                responses: Vec::with_capacity(num_txns),
                write_set: WriteSet::new(),
            }),
        }
    }

    /// Stores the result of an execution attempt, replacing the previous
    /// incarnation's.
    pub fn store(&self, result: ExecutionResult) {
        let idx = result.version.txn_idx as usize;
        *self.results[idx].lock() = Some(result);
    }

    /// Commits every transaction at the head of the block that is final.
    ///
    /// Only one thread commits at a time; a concurrent caller returns
    /// immediately with zero.
    pub fn try_commit(&self, scheduler: &Scheduler) -> Result<usize, EngineError> {
        let Some(mut committed) = self.committed.try_lock() else {
            return Ok(0);
        };

        let mut count = 0;
        while let Some(version) = scheduler.try_commit() {
            let txn_idx = version.txn_idx;
            let result = self.results[txn_idx as usize]
                .lock()
                .take()
                .ok_or(EngineError::MissingResult { txn_idx })?;
            if result.version != version {
                return Err(EngineError::StaleResult {
                    txn_idx,
                    expected: version.incarnation,
                    found: result.version.incarnation,
                });
            }

            let output = result.output.map_err(|err| {
                warn!(target: "occ", %version, error = %err, "Committed attempt hit a storage failure");
                EngineError::Storage(err)
            })?;

            trace!(target: "occ", %version, "Committed transaction");
            committed.write_set.extend(result.write_set);
            committed.responses.push(output);
            count += 1;
        }
        Ok(count)
    }

    /// Number of transactions committed so far.
    pub fn committed_count(&self) -> TxnIndex {
        self.committed.lock().responses.len() as TxnIndex
    }

    /// Ordered responses and the committed diff.
    pub fn into_output(self) -> (Vec<TxOutput>, WriteSet) {
        let committed = self.committed.into_inner();
        (committed.responses, committed.write_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::scheduler::Task;
    use crate::types::{ReadSet, StateKey, StateValue, TxResponse, Version};
    use alloy_primitives::Bytes;

    fn kv(name: &'static str) -> StateKey {
        StateKey::Kv(Bytes::from_static(name.as_bytes()))
    }

    fn result(version: Version, key: StateKey, value: Option<StateValue>, log: &str) -> ExecutionResult {
        let mut write_set = WriteSet::new();
        write_set.insert(key, value);
        ExecutionResult {
            version,
            read_set: ReadSet::new(),
            write_set,
            output: Ok(Ok(TxResponse {
                log: log.to_string(),
                ..Default::default()
            })),
        }
    }

    fn run_to_validated(scheduler: &Scheduler, idx: TxnIndex) {
        let Some(Task::Execute(version)) = scheduler.next_task() else {
            panic!("Expected Execute task for {idx}");
        };
        assert_eq!(version.txn_idx, idx);
        scheduler.finish_execution(idx, 0, true).unwrap();
        let Some(Task::Validate { version, wave }) = scheduler.next_task() else {
            panic!("Expected Validate task for {idx}");
        };
        scheduler.finish_validation(version.txn_idx, version.incarnation, wave);
    }

    #[test]
    fn test_commits_in_order_and_folds_writes() {
        let scheduler = Scheduler::new(2);
        let sequencer = CommitSequencer::new(2);
        let value = Some(StateValue::Bytes(Bytes::from_static(b"x")));

        sequencer.store(result(Version::new(0, 0), kv("a"), value.clone(), "first"));
        sequencer.store(result(Version::new(1, 0), kv("a"), None, "second"));

        run_to_validated(&scheduler, 0);
        assert_eq!(sequencer.try_commit(&scheduler).unwrap(), 1);
        run_to_validated(&scheduler, 1);
        assert_eq!(sequencer.try_commit(&scheduler).unwrap(), 1);
        assert!(scheduler.done());

        let (responses, write_set) = sequencer.into_output();
        let logs: Vec<_> = responses.iter().map(|r| r.as_ref().unwrap().log.clone()).collect();
        assert_eq!(logs, vec!["first", "second"]);
        // The later deletion wins
        assert_eq!(write_set.get(&kv("a")), Some(&None));
    }

    #[test]
    fn test_missing_result_is_engine_fault() {
        let scheduler = Scheduler::new(1);
        let sequencer = CommitSequencer::new(1);
        run_to_validated(&scheduler, 0);
        assert_eq!(
            sequencer.try_commit(&scheduler).unwrap_err(),
            EngineError::MissingResult { txn_idx: 0 }
        );
    }

    #[test]
    fn test_stale_result_is_engine_fault() {
        let scheduler = Scheduler::new(1);
        let sequencer = CommitSequencer::new(1);
        sequencer.store(result(Version::new(0, 3), kv("a"), None, "old"));
        run_to_validated(&scheduler, 0);
        assert_eq!(
            sequencer.try_commit(&scheduler).unwrap_err(),
            EngineError::StaleResult {
                txn_idx: 0,
                expected: 0,
                found: 3
            }
        );
    }

    #[test]
    fn test_committed_storage_failure_is_engine_fault() {
        let scheduler = Scheduler::new(1);
        let sequencer = CommitSequencer::new(1);
        let mut faulted = result(Version::new(0, 0), kv("a"), None, "unused");
        faulted.output = Err(StorageError::Backend("disk gone".to_string()));
        sequencer.store(faulted);

        run_to_validated(&scheduler, 0);
        assert_eq!(
            sequencer.try_commit(&scheduler).unwrap_err(),
            EngineError::Storage(StorageError::Backend("disk gone".to_string()))
        );
    }
}
