//! Authoritative state seen by the engine.

use crate::error::StorageError;
use crate::types::{StateKey, StateValue, WriteSet};
use std::collections::BTreeMap;

/// Read access to the state as of the start of the block.
///
/// Workers call this concurrently for keys no lower transaction has written.
pub trait StateView: Sync {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StorageError>;
}

/// The durable side of a block: receives the committed diff once the block
/// has fully committed.
pub trait CommitStore {
    fn commit(&mut self, write_set: &WriteSet) -> Result<(), StorageError>;
}

impl<T: StateView + ?Sized> StateView for &T {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StorageError> {
        (**self).get(key)
    }
}

/// Plain in-memory state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryState {
    data: BTreeMap<StateKey, StateValue>,
}

impl InMemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: StateKey, value: StateValue) {
        self.data.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &StateValue)> {
        self.data.iter()
    }
}

impl FromIterator<(StateKey, StateValue)> for InMemoryState {
    fn from_iter<I: IntoIterator<Item = (StateKey, StateValue)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

impl StateView for InMemoryState {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StorageError> {
        Ok(self.data.get(key).cloned())
    }
}

impl CommitStore for InMemoryState {
    fn commit(&mut self, write_set: &WriteSet) -> Result<(), StorageError> {
        for (key, value) in write_set {
            match value {
                Some(value) => {
                    self.data.insert(key.clone(), value.clone());
                }
                None => {
                    self.data.remove(key);
                }
            }
        }
        Ok(())
    }
}
