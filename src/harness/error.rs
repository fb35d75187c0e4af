//! Harness phase errors.
//!
//! Import and convergence failures propagate to the orchestrator. Patch
//! failures are captured into the run report and never propagate past the
//! dispatcher.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Store error during import: {0}")]
    Store(#[from] StoreError),

    #[error("Import worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: StoreError,
    },

    #[error("Import worker panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ConvergenceError {
    #[error("Store error while waiting for indexes: {0}")]
    Store(#[from] StoreError),

    #[error("Indexes still stale after {waited_secs}s: {stale:?}")]
    TimedOut { waited_secs: u64, stale: Vec<String> },
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Store error during patch: {0}")]
    Store(#[from] StoreError),

    #[error("Unrecognised operation result message: {0:?}")]
    UnparseableResult(String),

    #[error("Patch task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Index convergence failed: {0}")]
    Convergence(#[from] ConvergenceError),

    #[error("Disk benchmark failed: {0}")]
    Disk(#[from] std::io::Error),
}
