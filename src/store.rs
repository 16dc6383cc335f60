//! Authoritative account store.
//!
//! Balances, nonces and contract storage live in a revm [`CacheDB`]; opaque
//! module keys live beside it in an ordered map. The engine reads it as the
//! block's base state and hands it the committed diff at the end of the block.

use alloy_primitives::{Address, Bytes, U256};
use occ_executor::{CommitStore, StateKey, StateValue, StateView, StorageError, WriteSet};
use revm::{
    database::{CacheDB, EmptyDB},
    state::AccountInfo,
};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AccountStore {
    db: CacheDB<EmptyDB>,
    kv: BTreeMap<Bytes, Bytes>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            db: CacheDB::new(EmptyDB::default()),
            kv: BTreeMap::new(),
        }
    }

    /// Creates or overwrites an account's balance.
    pub fn fund(&mut self, address: Address, balance: U256) {
        let mut info = self.info(address);
        info.balance = balance;
        self.db.insert_account_info(address, info);
    }

    fn info(&self, address: Address) -> AccountInfo {
        self.db
            .cache
            .accounts
            .get(&address)
            .map(|account| account.info.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.info(address).balance
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.info(address).nonce
    }

    pub fn storage(&self, contract: Address, slot: U256) -> U256 {
        self.db
            .cache
            .accounts
            .get(&contract)
            .and_then(|account| account.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    pub fn kv(&self, key: &[u8]) -> Option<&Bytes> {
        self.kv.get(&Bytes::copy_from_slice(key))
    }

    /// Every key the store holds, with its value.
    pub fn snapshot(&self) -> BTreeMap<StateKey, StateValue> {
        let mut snapshot = BTreeMap::new();
        for (address, account) in self.db.cache.accounts.iter() {
            snapshot.insert(
                StateKey::Balance(*address),
                StateValue::Balance(account.info.balance),
            );
            snapshot.insert(
                StateKey::Nonce(*address),
                StateValue::Nonce(account.info.nonce),
            );
            for (slot, value) in account.storage.iter() {
                snapshot.insert(
                    StateKey::Storage(*address, *slot),
                    StateValue::Storage(*value),
                );
            }
        }
        for (key, value) in &self.kv {
            snapshot.insert(StateKey::Kv(key.clone()), StateValue::Bytes(value.clone()));
        }
        snapshot
    }

    fn apply(&mut self, key: &StateKey, value: Option<&StateValue>) -> Result<(), StorageError> {
        match key {
            StateKey::Balance(address) => {
                let balance = match value {
                    Some(value) => value.as_balance().ok_or_else(|| mismatch(key, value))?,
                    None => U256::ZERO,
                };
                let mut info = self.info(*address);
                info.balance = balance;
                self.db.insert_account_info(*address, info);
            }
            StateKey::Nonce(address) => {
                let nonce = match value {
                    Some(value) => value.as_nonce().ok_or_else(|| mismatch(key, value))?,
                    None => 0,
                };
                let mut info = self.info(*address);
                info.nonce = nonce;
                self.db.insert_account_info(*address, info);
            }
            StateKey::Storage(contract, slot) => match value {
                Some(value) => {
                    let value = value.as_storage().ok_or_else(|| mismatch(key, value))?;
                    self.db
                        .insert_account_storage(*contract, *slot, value)
                        .map_err(|e| StorageError::Backend(e.to_string()))?;
                }
                None => {
                    if let Some(account) = self.db.cache.accounts.get_mut(contract) {
                        account.storage.remove(slot);
                    }
                }
            },
            StateKey::Kv(raw) => match value {
                Some(value) => {
                    let bytes = value.as_bytes().ok_or_else(|| mismatch(key, value))?;
                    self.kv.insert(raw.clone(), bytes.clone());
                }
                None => {
                    self.kv.remove(raw);
                }
            },
        }
        Ok(())
    }
}

fn mismatch(key: &StateKey, value: &StateValue) -> StorageError {
    StorageError::TypeMismatch(format!("{key} cannot hold {value:?}"))
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateView for AccountStore {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>, StorageError> {
        let accounts = &self.db.cache.accounts;
        Ok(match key {
            StateKey::Balance(address) => accounts
                .get(address)
                .map(|account| StateValue::Balance(account.info.balance)),
            StateKey::Nonce(address) => accounts
                .get(address)
                .map(|account| StateValue::Nonce(account.info.nonce)),
            StateKey::Storage(contract, slot) => accounts
                .get(contract)
                .and_then(|account| account.storage.get(slot))
                .map(|value| StateValue::Storage(*value)),
            StateKey::Kv(raw) => self.kv.get(raw).cloned().map(StateValue::Bytes),
        })
    }
}

impl CommitStore for AccountStore {
    fn commit(&mut self, write_set: &WriteSet) -> Result<(), StorageError> {
        for (key, value) in write_set {
            self.apply(key, value.as_ref())?;
        }
        debug!(target: "occ", keys = write_set.len(), "Committed block diff");
        Ok(())
    }
}
