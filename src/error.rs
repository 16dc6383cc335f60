//! Node-level errors.

use occ_executor::{EngineError, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("signing failed: {0}")]
    Signing(#[from] k256::ecdsa::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sequential and parallel execution disagreed.
    #[error("execution diverged: {0}")]
    Divergence(String),
}
