//! Multi-version store for speculative block execution.
//!
//! For each key it keeps one entry per writing transaction index, so a reader
//! at index `i` always sees the write of the highest index below `i`. Handlers
//! never touch it directly: executions buffer their writes and the worker
//! installs the whole write set once the handler returns, so abandoning a
//! speculative run needs no cleanup here.
//!
//! An entry flagged as an estimate belongs to an aborted incarnation whose
//! re-execution has not finished yet. Readers must wait for that writer
//! instead of using the value or falling through to lower versions.

use crate::types::{Incarnation, ReadSet, StateKey, StateValue, TxnIndex, Version, WriteSet};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Entry in the version history of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEntry {
    pub version: Version,
    /// `None` is a deletion.
    pub value: Option<StateValue>,
    pub is_estimate: bool,
}

/// Result of reading from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MvsRead {
    /// Written by a lower transaction at this version.
    Versioned(Version, Option<StateValue>),
    /// No lower transaction wrote the key; read the base state.
    Storage,
    /// The closest lower writer is unresolved.
    Estimate(TxnIndex),
}

/// Read set captured by the latest completed incarnation of a transaction.
#[derive(Debug, Clone, Default)]
struct CapturedReads {
    incarnation: Incarnation,
    reads: ReadSet,
}

/// Multi-version store shared by all workers of one block.
///
/// Structure: StateKey -> BTreeMap<TxnIndex -> VersionedEntry>
#[derive(Debug)]
pub struct MultiVersionStore {
    data: DashMap<StateKey, BTreeMap<TxnIndex, VersionedEntry>>,
    /// Keys written by the last recorded incarnation of each transaction.
    last_written: Vec<RwLock<BTreeSet<StateKey>>>,
    last_reads: Vec<RwLock<Option<CapturedReads>>>,
}

impl MultiVersionStore {
    pub fn new(num_txns: usize) -> Self {
        Self {
            data: DashMap::new(),
            last_written: std::iter::repeat_with(|| RwLock::new(BTreeSet::new()))
                .take(num_txns)
                .collect(),
            last_reads: std::iter::repeat_with(|| RwLock::new(None))
                .take(num_txns)
                .collect(),
        }
    }

    /// Reads the latest version of `key` visible to `reader_idx`.
    pub fn read(&self, key: &StateKey, reader_idx: TxnIndex) -> MvsRead {
        let Some(versions) = self.data.get(key) else {
            return MvsRead::Storage;
        };
        match versions.range(..reader_idx).next_back() {
            Some((&writer_idx, entry)) if entry.is_estimate => MvsRead::Estimate(writer_idx),
            Some((_, entry)) => MvsRead::Versioned(entry.version, entry.value.clone()),
            None => MvsRead::Storage,
        }
    }

    /// Installs a single versioned write.
    ///
    /// The entry replaces any earlier incarnation of the same transaction; lower
    /// and higher writers of the key are untouched.
    pub fn write(
        &self,
        key: StateKey,
        value: Option<StateValue>,
        writer_idx: TxnIndex,
        incarnation: Incarnation,
    ) {
        let entry = VersionedEntry {
            version: Version::new(writer_idx, incarnation),
            value,
            is_estimate: false,
        };
        let mut versions = self.data.entry(key).or_default();
        if let Some(prev) = versions.get(&writer_idx) {
            debug_assert!(
                prev.version.incarnation <= incarnation,
                "older incarnation overwriting a newer one"
            );
        }
        versions.insert(writer_idx, entry);
    }

    /// Records a finished execution: installs its writes, drops keys the previous
    /// incarnation wrote but this one did not, and keeps its read set for
    /// validation. Any estimates left by the previous incarnation are gone
    /// afterwards.
    ///
    /// Returns true if the execution wrote a key its previous incarnation did
    /// not, which means higher transactions must all be revalidated.
    pub fn record(&self, version: Version, read_set: ReadSet, write_set: &WriteSet) -> bool {
        let Version {
            txn_idx,
            incarnation,
        } = version;

        for (key, value) in write_set {
            self.write(key.clone(), value.clone(), txn_idx, incarnation);
        }

        let new_locations: BTreeSet<StateKey> = write_set.keys().cloned().collect();
        let wrote_new_location = {
            let mut last_written = self.last_written[txn_idx as usize].write();
            for stale in last_written.difference(&new_locations) {
                self.remove(stale, txn_idx);
            }
            let wrote_new = new_locations.difference(&last_written).next().is_some();
            *last_written = new_locations;
            wrote_new
        };

        *self.last_reads[txn_idx as usize].write() = Some(CapturedReads {
            incarnation,
            reads: read_set,
        });

        wrote_new_location
    }

    fn remove(&self, key: &StateKey, txn_idx: TxnIndex) {
        if let Some(mut versions) = self.data.get_mut(key) {
            versions.remove(&txn_idx);
        }
    }

    /// Flags every write of the transaction's last incarnation as an estimate.
    pub fn mark_estimate(&self, txn_idx: TxnIndex) {
        let locations = self.last_written[txn_idx as usize].read();
        for key in locations.iter() {
            let versions = self.data.get_mut(key);
            debug_assert!(
                versions.is_some(),
                "last_written should only contain locations that have been written to"
            );
            if let Some(mut versions) = versions {
                if let Some(entry) = versions.get_mut(&txn_idx) {
                    entry.is_estimate = true;
                }
            }
        }
    }

    /// Runs `f` over the read set captured by the transaction's latest recorded
    /// incarnation, or returns `None` if it has never been recorded.
    pub fn with_read_set<R>(
        &self,
        txn_idx: TxnIndex,
        f: impl FnOnce(Incarnation, &ReadSet) -> R,
    ) -> Option<R> {
        let guard = self.last_reads[txn_idx as usize].read();
        guard
            .as_ref()
            .map(|captured| f(captured.incarnation, &captured.reads))
    }
}
