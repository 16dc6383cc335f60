//! Optimistic parallel execution of ordered transaction blocks.
//!
//! This crate executes a block of transactions speculatively on many threads
//! and produces exactly the responses and state diff that executing them one
//! by one in block order would. It follows the Block-STM design: executions
//! run against a multi-version store, are validated in index order against
//! the exact versions they read, and are re-executed with a new incarnation
//! when a lower transaction invalidates them.
//!
//! # Core Components
//!
//! - **MultiVersionStore**: per-key version history; estimates mark writes of
//!   aborted incarnations so readers wait instead of reading garbage
//! - **Scheduler**: execution and validation cursors, per-transaction status,
//!   dependency wake-ups and the in-order commit rule
//! - **VersionedView**: the handler's context, recording reads and buffering writes
//! - **Validator**: compares a read set against the versions visible now
//! - **CommitSequencer**: finalizes results and emits responses in block order
//! - **ParallelExecutor**: the worker pool that drives all of the above
//!
//! Business logic plugs in through [`TransactionHandler`]s registered by
//! [`MessageKind`] in a [`HandlerRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use occ_executor::{execute_block, HandlerRegistry, InMemoryState};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HandlerRegistry::new().with("counter/incr", incr));
//! let output = execute_block(registry, &transactions, &InMemoryState::new(), 4)?;
//! println!("Successful: {}, Failed: {}", output.successful(), output.failed());
//! ```

pub mod commit;
pub mod error;
pub mod executor;
pub mod handler;
pub mod mvs;
pub mod scheduler;
pub mod sequential;
pub mod state;
pub mod types;
pub mod validator;
pub mod view;

pub use error::{ApplicationError, EngineError, HandlerError, ReadError, StorageError};
pub use executor::{execute_block, ExecutorConfig, ParallelExecutor, MAX_BLOCK_TXNS};
pub use handler::{HandlerRegistry, TransactionHandler, TxContext};
pub use sequential::execute_block_sequential;
pub use state::{CommitStore, InMemoryState, StateView};
pub use types::{
    BlockOutput, ExecutionResult, ExecutionStats, Incarnation, MessageKind, ReadOrigin, ReadSet,
    StateKey, StateValue, Transaction, TxOutput, TxResponse, TxnIndex, Version, WriteSet,
};
