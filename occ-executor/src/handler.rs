//! Handler contract and the message-kind registry.
//!
//! Handlers are the business logic of the chain. The engine invokes the one
//! registered for a transaction's [`MessageKind`] against a [`TxContext`] and
//! knows nothing else about it. A handler must be a deterministic function of
//! what it reads through the context and must not coordinate with other
//! threads on its own.

use crate::error::{ApplicationError, HandlerError, ReadError};
use crate::types::{Incarnation, MessageKind, StateKey, StateValue, Transaction, TxResponse, TxnIndex};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Read/write access a handler gets for one execution attempt.
pub trait TxContext {
    /// Block index of the transaction being executed.
    fn txn_idx(&self) -> TxnIndex;

    /// Attempt number of this execution.
    fn incarnation(&self) -> Incarnation;

    /// Reads a key. The handler's own buffered writes are seen first.
    fn get(&mut self, key: &StateKey) -> Result<Option<StateValue>, ReadError>;

    /// Buffers a write.
    fn set(&mut self, key: StateKey, value: StateValue);

    /// Buffers a deletion.
    fn delete(&mut self, key: StateKey);
}

/// Business logic for one message kind.
pub trait TransactionHandler: Send + Sync {
    fn execute(&self, tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError>;
}

impl<F> TransactionHandler for F
where
    F: Fn(&Transaction, &mut dyn TxContext) -> Result<TxResponse, HandlerError> + Send + Sync,
{
    fn execute(&self, tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
        self(tx, ctx)
    }
}

/// Maps message kinds to handlers. Built once at startup, then shared
/// read-only by every worker.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Arc<dyn TransactionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the kind.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl TransactionHandler + 'static) -> &mut Self {
        self.handlers.insert(MessageKind::new(kind), Arc::new(handler));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, kind: impl Into<String>, handler: impl TransactionHandler + 'static) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for `tx`.
    ///
    /// Unknown kinds and handler panics become application errors. Read
    /// errors are returned as-is for the engine to act on.
    pub fn dispatch(
        &self,
        tx: &Transaction,
        ctx: &mut dyn TxContext,
    ) -> Result<TxResponse, HandlerError> {
        let Some(handler) = self.handlers.get(&tx.kind) else {
            return Err(ApplicationError::unknown_message(tx.kind.as_str()).into());
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.execute(tx, ctx))) {
            Ok(result) => result,
            Err(payload) => Err(ApplicationError::panic(panic_message(payload.as_ref())).into()),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(MessageKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
