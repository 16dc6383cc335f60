//! Error taxonomy for block execution.
//!
//! Only [`EngineError`] ever escapes the engine. Business failures live inside
//! each transaction's output as [`ApplicationError`]; conflict aborts are
//! retried internally and never surfaced.

use crate::types::{ExecutionStatus, Incarnation, TxnIndex};
use thiserror::Error;

/// Codespace used for errors raised by the engine on behalf of a handler.
pub const ENGINE_CODESPACE: &str = "occ";

/// No handler is registered for the transaction's message kind.
pub const CODE_UNKNOWN_MESSAGE: u32 = 1;

/// The handler panicked.
pub const CODE_PANIC: u32 = 2;

/// A handler-reported business failure (insufficient funds, bad nonce, ...).
///
/// Part of the transaction's response, identical under sequential and
/// parallel execution.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("{codespace}:{code}: {log}")]
pub struct ApplicationError {
    pub codespace: String,
    pub code: u32,
    pub log: String,
}

impl ApplicationError {
    pub fn new(codespace: impl Into<String>, code: u32, log: impl Into<String>) -> Self {
        Self {
            codespace: codespace.into(),
            code,
            log: log.into(),
        }
    }

    pub fn unknown_message(kind: &str) -> Self {
        Self::new(
            ENGINE_CODESPACE,
            CODE_UNKNOWN_MESSAGE,
            format!("unknown message kind: {kind}"),
        )
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(ENGINE_CODESPACE, CODE_PANIC, message)
    }
}

/// Error reading from the authoritative base state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("value type mismatch for key {0}")]
    TypeMismatch(String),
}

/// A read could not be served. Engine-internal: handlers only propagate it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// The block was halted by an engine fault while this read was pending.
    #[error("block execution halted")]
    Halted,

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The read view observed a version it can never legally see.
    #[error("reader {reader} observed dependency on writer {writer}")]
    DependencyCycle { reader: TxnIndex, writer: TxnIndex },
}

/// What a handler can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    App(#[from] ApplicationError),

    #[error(transparent)]
    Read(#[from] ReadError),
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        HandlerError::Read(ReadError::Storage(err))
    }
}

/// Violation of an engine invariant. Fatal for the whole block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid executor config: {0}")]
    InvalidConfig(String),

    #[error("transaction {reader} blocked on non-lower transaction {writer}")]
    DependencyCycle { reader: TxnIndex, writer: TxnIndex },

    #[error("transaction {txn_idx} in unexpected status {status:?} during {operation}")]
    InvalidStatus {
        txn_idx: TxnIndex,
        status: ExecutionStatus,
        operation: &'static str,
    },

    #[error("transaction {txn_idx}: stored result is incarnation {found}, expected {expected}")]
    StaleResult {
        txn_idx: TxnIndex,
        expected: Incarnation,
        found: Incarnation,
    },

    #[error("transaction {txn_idx} committed without an execution result")]
    MissingResult { txn_idx: TxnIndex },

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("worker {worker_id} panicked")]
    WorkerPanicked { worker_id: usize },

    #[error("block execution halted")]
    Halted,
}

impl From<ReadError> for EngineError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Halted => EngineError::Halted,
            ReadError::Storage(e) => EngineError::Storage(e),
            ReadError::DependencyCycle { reader, writer } => {
                EngineError::DependencyCycle { reader, writer }
            }
        }
    }
}
