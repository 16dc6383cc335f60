//! Handler contexts: the speculative view bound to the multi-version store,
//! and the plain overlay used for sequential execution.

use crate::error::ReadError;
use crate::handler::TxContext;
use crate::mvs::{MultiVersionStore, MvsRead};
use crate::scheduler::{wait_on, DependencyResult, DependencyStatus, Scheduler};
use crate::state::StateView;
use crate::types::{
    Incarnation, ReadOrigin, ReadSet, StateKey, StateValue, TxnIndex, Version, WriteSet,
};
use std::collections::BTreeMap;
use tracing::trace;

/// View of the state for one speculative execution attempt.
///
/// Reads resolve through the multi-version store at the transaction's index
/// and fall back to the base state; each key's first observation is recorded
/// with the version it came from and reused for later reads of the same key.
/// Writes are buffered until the attempt finishes.
pub struct VersionedView<'a, S: StateView> {
    version: Version,
    mvs: &'a MultiVersionStore,
    scheduler: &'a Scheduler,
    base: &'a S,
    read_set: ReadSet,
    read_values: BTreeMap<StateKey, Option<StateValue>>,
    write_set: WriteSet,
    dependency_waits: usize,
}

impl<'a, S: StateView> VersionedView<'a, S> {
    pub fn new(
        version: Version,
        mvs: &'a MultiVersionStore,
        scheduler: &'a Scheduler,
        base: &'a S,
    ) -> Self {
        Self {
            version,
            mvs,
            scheduler,
            base,
            read_set: ReadSet::new(),
            read_values: BTreeMap::new(),
            write_set: WriteSet::new(),
            dependency_waits: 0,
        }
    }

    /// Consumes the view, returning the captured read set, the buffered
    /// writes and how many times the attempt parked on an estimate.
    pub fn finish(self) -> (ReadSet, WriteSet, usize) {
        (self.read_set, self.write_set, self.dependency_waits)
    }

    fn read_through(&mut self, key: &StateKey) -> Result<(ReadOrigin, Option<StateValue>), ReadError> {
        let reader = self.version.txn_idx;
        loop {
            match self.mvs.read(key, reader) {
                MvsRead::Versioned(version, value) => return Ok((ReadOrigin::Versioned(version), value)),
                MvsRead::Storage => return Ok((ReadOrigin::Storage, self.base.get(key)?)),
                MvsRead::Estimate(writer) => {
                    match self.scheduler.wait_for_dependency(reader, writer)? {
                        DependencyResult::Resolved => {}
                        DependencyResult::Halted => return Err(ReadError::Halted),
                        DependencyResult::Wait(condvar) => {
                            trace!(
                                target: "occ",
                                txn_idx = reader,
                                writer,
                                %key,
                                "Waiting on estimate"
                            );
                            self.dependency_waits += 1;
                            if wait_on(&condvar) == DependencyStatus::Halted {
                                return Err(ReadError::Halted);
                            }
                        }
                    }
                }
            }
        }
    }
}

impl<S: StateView> TxContext for VersionedView<'_, S> {
    fn txn_idx(&self) -> TxnIndex {
        self.version.txn_idx
    }

    fn incarnation(&self) -> Incarnation {
        self.version.incarnation
    }

    fn get(&mut self, key: &StateKey) -> Result<Option<StateValue>, ReadError> {
        if let Some(value) = self.write_set.get(key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.read_values.get(key) {
            return Ok(value.clone());
        }

        let (origin, value) = match self.read_through(key) {
            Ok(read) => read,
            Err(ReadError::Storage(err)) => {
                // Lower writers of the key still invalidate the failed attempt
                self.read_set.insert(key.clone(), ReadOrigin::Storage);
                return Err(ReadError::Storage(err));
            }
            Err(err) => return Err(err),
        };
        self.read_set.insert(key.clone(), origin);
        self.read_values.insert(key.clone(), value.clone());
        Ok(value)
    }

    fn set(&mut self, key: StateKey, value: StateValue) {
        self.write_set.insert(key, Some(value));
    }

    fn delete(&mut self, key: StateKey) {
        self.write_set.insert(key, None);
    }
}

/// Context for sequential execution: the block's writes so far layered over
/// the base state.
pub struct SequentialView<'a, S: StateView> {
    txn_idx: TxnIndex,
    committed: &'a WriteSet,
    base: &'a S,
    write_set: WriteSet,
}

impl<'a, S: StateView> SequentialView<'a, S> {
    pub fn new(txn_idx: TxnIndex, committed: &'a WriteSet, base: &'a S) -> Self {
        Self {
            txn_idx,
            committed,
            base,
            write_set: WriteSet::new(),
        }
    }

    pub fn into_write_set(self) -> WriteSet {
        self.write_set
    }
}

impl<S: StateView> TxContext for SequentialView<'_, S> {
    fn txn_idx(&self) -> TxnIndex {
        self.txn_idx
    }

    fn incarnation(&self) -> Incarnation {
        0
    }

    fn get(&mut self, key: &StateKey) -> Result<Option<StateValue>, ReadError> {
        if let Some(value) = self.write_set.get(key) {
            return Ok(value.clone());
        }
        if let Some(value) = self.committed.get(key) {
            return Ok(value.clone());
        }
        Ok(self.base.get(key)?)
    }

    fn set(&mut self, key: StateKey, value: StateValue) {
        self.write_set.insert(key, Some(value));
    }

    fn delete(&mut self, key: StateKey) {
        self.write_set.insert(key, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryState;
    use crate::types::ExecutionStatus;
    use alloy_primitives::{Address, U256};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn key(addr: u8) -> StateKey {
        StateKey::Balance(Address::repeat_byte(addr))
    }

    fn balance(v: u64) -> StateValue {
        StateValue::Balance(U256::from(v))
    }

    fn base() -> InMemoryState {
        [(key(1), balance(10))].into_iter().collect()
    }

    #[test]
    fn test_reads_record_origin() {
        let mvs = MultiVersionStore::new(3);
        let scheduler = Scheduler::new(3);
        let base = base();
        mvs.write(key(2), Some(balance(5)), 0, 0);

        let mut view = VersionedView::new(Version::new(1, 0), &mvs, &scheduler, &base);
        assert_eq!(view.get(&key(1)).unwrap(), Some(balance(10)));
        assert_eq!(view.get(&key(2)).unwrap(), Some(balance(5)));
        assert_eq!(view.get(&key(3)).unwrap(), None);

        let (reads, writes, waits) = view.finish();
        assert_eq!(reads.get(&key(1)), Some(&ReadOrigin::Storage));
        assert_eq!(reads.get(&key(2)), Some(&ReadOrigin::Versioned(Version::new(0, 0))));
        assert_eq!(reads.get(&key(3)), Some(&ReadOrigin::Storage));
        assert!(writes.is_empty());
        assert_eq!(waits, 0);
    }

    struct BrokenBase;

    impl StateView for BrokenBase {
        fn get(&self, key: &StateKey) -> Result<Option<StateValue>, crate::error::StorageError> {
            Err(crate::error::StorageError::Backend(format!("cannot read {key}")))
        }
    }

    #[test]
    fn test_failed_base_read_is_recorded() {
        let mvs = MultiVersionStore::new(2);
        let scheduler = Scheduler::new(2);

        let mut view = VersionedView::new(Version::new(1, 0), &mvs, &scheduler, &BrokenBase);
        assert!(matches!(view.get(&key(1)), Err(ReadError::Storage(_))));

        // A later write by transaction 0 must invalidate the failed attempt
        let (reads, _, _) = view.finish();
        assert_eq!(reads.get(&key(1)), Some(&ReadOrigin::Storage));
    }

    #[test]
    fn test_own_writes_are_not_recorded_as_reads() {
        let mvs = MultiVersionStore::new(1);
        let scheduler = Scheduler::new(1);
        let base = base();

        let mut view = VersionedView::new(Version::new(0, 0), &mvs, &scheduler, &base);
        view.set(key(1), balance(3));
        assert_eq!(view.get(&key(1)).unwrap(), Some(balance(3)));
        view.delete(key(1));
        assert_eq!(view.get(&key(1)).unwrap(), None);

        let (reads, writes, _) = view.finish();
        assert!(reads.is_empty());
        assert_eq!(writes.get(&key(1)), Some(&None));
    }

    #[test]
    fn test_repeated_read_is_stable() {
        let mvs = MultiVersionStore::new(3);
        let scheduler = Scheduler::new(3);
        let base = base();

        let mut view = VersionedView::new(Version::new(2, 0), &mvs, &scheduler, &base);
        assert_eq!(view.get(&key(1)).unwrap(), Some(balance(10)));
        // A lower transaction writes the key mid-execution
        mvs.write(key(1), Some(balance(99)), 0, 0);
        assert_eq!(view.get(&key(1)).unwrap(), Some(balance(10)));
        let (reads, _, _) = view.finish();
        assert_eq!(reads.get(&key(1)), Some(&ReadOrigin::Storage));
    }

    #[test]
    fn test_estimate_waits_for_writer() {
        let mvs = Arc::new(MultiVersionStore::new(2));
        let scheduler = Arc::new(Scheduler::new(2));
        let base = base();

        // Transaction 0 executed once, then got aborted
        let Some(crate::scheduler::Task::Execute(v0)) = scheduler.next_task() else {
            panic!("Expected Execute task");
        };
        let mut writes = WriteSet::new();
        writes.insert(key(1), Some(balance(1)));
        mvs.record(v0, ReadSet::new(), &writes);
        scheduler.finish_execution(0, 0, true).unwrap();
        assert!(scheduler.try_validation_abort(0, 0));
        mvs.mark_estimate(0);
        scheduler.finish_abort(0, 0).unwrap();
        assert_eq!(scheduler.status(0), ExecutionStatus::Executing(1));

        let writer = {
            let mvs = Arc::clone(&mvs);
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut writes = WriteSet::new();
                writes.insert(key(1), Some(balance(2)));
                mvs.record(Version::new(0, 1), ReadSet::new(), &writes);
                scheduler.finish_execution(0, 1, false).unwrap();
            })
        };

        let mut view = VersionedView::new(Version::new(1, 0), &mvs, &scheduler, &base);
        assert_eq!(view.get(&key(1)).unwrap(), Some(balance(2)));
        writer.join().unwrap();

        let (reads, _, waits) = view.finish();
        assert_eq!(reads.get(&key(1)), Some(&ReadOrigin::Versioned(Version::new(0, 1))));
        assert!(waits <= 1);
    }

    #[test]
    fn test_halt_interrupts_wait() {
        let mvs = MultiVersionStore::new(2);
        let scheduler = Scheduler::new(2);
        let base = base();

        let Some(crate::scheduler::Task::Execute(v0)) = scheduler.next_task() else {
            panic!("Expected Execute task");
        };
        let mut writes = WriteSet::new();
        writes.insert(key(1), Some(balance(1)));
        mvs.record(v0, ReadSet::new(), &writes);
        mvs.mark_estimate(0);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                scheduler.halt();
            });
            let mut view = VersionedView::new(Version::new(1, 0), &mvs, &scheduler, &base);
            assert_eq!(view.get(&key(1)), Err(ReadError::Halted));
        });
    }

    #[test]
    fn test_sequential_view_layers() {
        let base = base();
        let mut committed = WriteSet::new();
        committed.insert(key(1), None);
        committed.insert(key(2), Some(balance(4)));

        let mut view = SequentialView::new(3, &committed, &base);
        assert_eq!(view.get(&key(1)).unwrap(), None);
        assert_eq!(view.get(&key(2)).unwrap(), Some(balance(4)));
        view.set(key(2), balance(6));
        assert_eq!(view.get(&key(2)).unwrap(), Some(balance(6)));
        assert_eq!(view.into_write_set().len(), 1);
    }
}
