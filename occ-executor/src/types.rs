//! Core types for OCC block execution.

use crate::error::{ApplicationError, StorageError};
use alloy_primitives::{Address, Bytes, U256};
use std::collections::BTreeMap;
use std::fmt;

/// Transaction index in the block (0-based).
pub type TxnIndex = u32;

/// Incarnation number (how many times a transaction has been re-executed).
pub type Incarnation = u32;

/// Version identifier for a transaction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub txn_idx: TxnIndex,
    pub incarnation: Incarnation,
}

impl Version {
    pub fn new(txn_idx: TxnIndex, incarnation: Incarnation) -> Self {
        Self {
            txn_idx,
            incarnation,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(txn={}, inc={})", self.txn_idx, self.incarnation)
    }
}

/// A key in the application state.
///
/// Account-shaped keys map onto the authoritative account store; `Kv` is an
/// opaque module keyspace for everything else (counters, module params).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    /// Account balance.
    Balance(Address),
    /// Account nonce.
    Nonce(Address),
    /// Contract storage slot: (contract, slot).
    Storage(Address, U256),
    /// Opaque module key.
    Kv(Bytes),
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Balance(addr) => write!(f, "Balance({addr})"),
            StateKey::Nonce(addr) => write!(f, "Nonce({addr})"),
            StateKey::Storage(addr, slot) => write!(f, "Storage({addr}, {slot})"),
            StateKey::Kv(key) => write!(f, "Kv({key})"),
        }
    }
}

/// A value in the application state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateValue {
    Balance(U256),
    Nonce(u64),
    Storage(U256),
    Bytes(Bytes),
}

impl StateValue {
    pub fn as_balance(&self) -> Option<U256> {
        match self {
            StateValue::Balance(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_nonce(&self) -> Option<u64> {
        match self {
            StateValue::Nonce(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_storage(&self) -> Option<U256> {
        match self {
            StateValue::Storage(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            StateValue::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// Where a recorded read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOrigin {
    /// A write by a lower transaction, at this exact version.
    Versioned(Version),
    /// Nothing in the multi-version store; served by the base state.
    Storage,
}

/// Keys read by one execution attempt and where each was served from.
pub type ReadSet = BTreeMap<StateKey, ReadOrigin>;

/// Buffered writes of one execution attempt. `None` deletes the key.
pub type WriteSet = BTreeMap<StateKey, Option<StateValue>>;

/// Tag selecting the handler for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKind(pub String);

impl MessageKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable transaction. Its block index is its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub kind: MessageKind,
    pub sender: Address,
    pub payload: Bytes,
}

impl Transaction {
    pub fn new(kind: MessageKind, sender: Address, payload: Bytes) -> Self {
        Self {
            kind,
            sender,
            payload,
        }
    }
}

/// Successful handler response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxResponse {
    pub gas_used: u64,
    pub data: Bytes,
    pub log: String,
}

/// Per-transaction output: a response or the business failure the handler reported.
pub type TxOutput = Result<TxResponse, ApplicationError>;

/// Result of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub version: Version,
    pub read_set: ReadSet,
    pub write_set: WriteSet,
    /// `Err` if a base-state read failed. The failure is only fatal for the
    /// block if this exact attempt is committed.
    pub output: Result<TxOutput, StorageError>,
}

/// Status of a transaction in the scheduler.
///
/// Validation has no status of its own: a transaction stays `Executed` while
/// it is validated, and a failed validation moves it to `Aborting`. Several
/// validations of the same incarnation may run concurrently at different
/// waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Waiting to be picked up for execution.
    Pending(Incarnation),
    /// Currently executing.
    Executing(Incarnation),
    /// Finished execution, awaiting (re)validation or commit.
    Executed(Incarnation),
    /// Validation failed; about to be re-incarnated.
    Aborting(Incarnation),
    /// Final for this block.
    Committed(Incarnation),
}

/// Counters collected during one block. Diagnostic only; they depend on
/// worker interleaving and are not part of the block's observable result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Handler invocations, including re-executions.
    pub executions: usize,
    /// Validations that failed and forced a re-execution.
    pub aborts: usize,
    /// Validation attempts.
    pub validations: usize,
    /// Times a worker parked on an estimate.
    pub dependency_waits: usize,
}

impl ExecutionStats {
    pub fn merge(&mut self, other: &ExecutionStats) {
        self.executions += other.executions;
        self.aborts += other.aborts;
        self.validations += other.validations;
        self.dependency_waits += other.dependency_waits;
    }
}

/// The externally observable result of executing a block.
#[derive(Debug, Clone, Default)]
pub struct BlockOutput {
    /// Per-transaction outputs in block order.
    pub responses: Vec<TxOutput>,
    /// Final committed value of every key written in the block.
    pub write_set: WriteSet,
    pub stats: ExecutionStats,
}

impl BlockOutput {
    pub fn successful(&self) -> usize {
        self.responses.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.responses.len() - self.successful()
    }
}
