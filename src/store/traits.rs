//! The store facade trait.

use async_trait::async_trait;

use super::error::StoreError;
use super::query::PatchByQuery;
use super::types::*;

/// Everything the harness needs from a document store.
///
/// Each call is a single network round trip (or its in-process equivalent)
/// and is never retried by the implementation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Base URL of the server, for reporting.
    fn url(&self) -> &str;

    /// Database all calls are scoped to.
    fn database(&self) -> &str;

    /// Write a batch of documents. Returns the number accepted.
    async fn bulk_insert(&self, docs: Vec<StoredDocument>) -> Result<usize, StoreError>;

    /// Create (or replace) index definitions.
    async fn put_indexes(&self, definitions: &[IndexDefinition]) -> Result<(), StoreError>;

    /// Current document count, index count and per-index staleness.
    async fn statistics(&self) -> Result<DatabaseStatistics, StoreError>;

    /// Start a patch-by-query operation. Completion is tracked separately.
    async fn submit_patch(&self, operation: &PatchByQuery) -> Result<OperationId, StoreError>;

    /// Poll the state of a previously submitted operation.
    async fn operation_state(&self, id: OperationId) -> Result<OperationState, StoreError>;

    /// Store (create or overwrite) a single document.
    async fn store_document(&self, doc: StoredDocument) -> Result<(), StoreError>;
}
