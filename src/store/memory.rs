//! In-process document store.
//!
//! Behaves like the remote store closely enough to drive every phase of a
//! run: indexes stay stale for a configurable number of statistics polls,
//! patch operations complete after a configurable number of state polls and
//! report the same `"Processed N items."` message. Failure injection hooks
//! let tests exercise the error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::StoreError;
use super::query::PatchByQuery;
use super::traits::DocumentStore;
use super::types::*;

/// Tuning for simulated latency of convergence and operations.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Statistics polls an index reports stale after creation or a write.
    pub index_stale_polls: u32,
    /// State polls a patch operation reports in-progress before completing.
    pub operation_polls_until_done: u32,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            index_stale_polls: 1,
            operation_polls_until_done: 1,
        }
    }
}

struct MemoryIndex {
    name: String,
    state: IndexState,
    stale_polls_remaining: u32,
}

struct MemoryOperation {
    initial_polls: u32,
    polls_remaining: u32,
    total: u64,
    outcome: Result<BulkOperationResult, String>,
}

pub struct InMemoryStore {
    database: String,
    config: MemoryStoreConfig,
    documents: Mutex<BTreeMap<String, StoredDocument>>,
    indexes: Mutex<Vec<MemoryIndex>>,
    operations: Mutex<HashMap<u64, MemoryOperation>>,
    next_operation: AtomicU64,
    statistics_calls: AtomicU64,
    insert_budget: Mutex<Option<usize>>,
    patch_fault: Mutex<Option<String>>,
}

impl InMemoryStore {
    pub fn new(database: &str) -> Self {
        Self::with_config(database, MemoryStoreConfig::default())
    }

    pub fn with_config(database: &str, config: MemoryStoreConfig) -> Self {
        Self {
            database: database.to_string(),
            config,
            documents: Mutex::new(BTreeMap::new()),
            indexes: Mutex::new(Vec::new()),
            operations: Mutex::new(HashMap::new()),
            next_operation: AtomicU64::new(1),
            statistics_calls: AtomicU64::new(0),
            insert_budget: Mutex::new(None),
            patch_fault: Mutex::new(None),
        }
    }

    // ── Inspection & fixtures ───────────────────────────────

    pub fn document_count(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn document(&self, id: &str) -> Option<StoredDocument> {
        self.documents.lock().ok()?.get(id).cloned()
    }

    /// Insert a document directly, bypassing bulk insert.
    pub fn seed_document(&self, collection: &str, id: &str, body: serde_json::Value) {
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert(
                id.to_string(),
                StoredDocument {
                    id: id.to_string(),
                    collection: collection.to_string(),
                    body,
                },
            );
        }
    }

    /// Register an index with explicit state, e.g. a disabled one.
    pub fn seed_index(&self, name: &str, state: IndexState, stale_polls: u32) {
        if let Ok(mut indexes) = self.indexes.lock() {
            indexes.retain(|i| i.name != name);
            indexes.push(MemoryIndex {
                name: name.to_string(),
                state,
                stale_polls_remaining: stale_polls,
            });
        }
    }

    pub fn statistics_calls(&self) -> u64 {
        self.statistics_calls.load(Ordering::Relaxed)
    }

    /// Allow `successful_calls` more bulk inserts, then reject the rest.
    pub fn fail_inserts_after(&self, successful_calls: usize) {
        if let Ok(mut budget) = self.insert_budget.lock() {
            *budget = Some(successful_calls);
        }
    }

    /// Make the next submitted patch operation fault with `reason`.
    pub fn fail_next_patch(&self, reason: &str) {
        if let Ok(mut fault) = self.patch_fault.lock() {
            *fault = Some(reason.to_string());
        }
    }

    fn mark_indexes_stale(&self) {
        if let Ok(mut indexes) = self.indexes.lock() {
            for index in indexes.iter_mut() {
                index.stale_polls_remaining =
                    index.stale_polls_remaining.max(self.config.index_stale_polls);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn url(&self) -> &str {
        "memory://local"
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn bulk_insert(&self, docs: Vec<StoredDocument>) -> Result<usize, StoreError> {
        {
            let mut budget = self
                .insert_budget
                .lock()
                .map_err(|_| StoreError::BulkInsertRejected("lock poisoned".into()))?;
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(StoreError::BulkInsertRejected(
                        "injected insert failure".into(),
                    ));
                }
                *remaining -= 1;
            }
        }

        let count = docs.len();
        {
            let mut stored = self
                .documents
                .lock()
                .map_err(|_| StoreError::BulkInsertRejected("lock poisoned".into()))?;
            for doc in docs {
                stored.insert(doc.id.clone(), doc);
            }
        }
        self.mark_indexes_stale();
        Ok(count)
    }

    async fn put_indexes(&self, definitions: &[IndexDefinition]) -> Result<(), StoreError> {
        for def in definitions {
            self.seed_index(&def.name, IndexState::Normal, self.config.index_stale_polls);
        }
        Ok(())
    }

    async fn statistics(&self) -> Result<DatabaseStatistics, StoreError> {
        self.statistics_calls.fetch_add(1, Ordering::Relaxed);

        let count_of_documents = self.document_count() as u64;
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|_| StoreError::ResponseParsing("lock poisoned".into()))?;

        let infos = indexes
            .iter_mut()
            .map(|index| {
                let is_stale = index.stale_polls_remaining > 0;
                index.stale_polls_remaining = index.stale_polls_remaining.saturating_sub(1);
                IndexInformation {
                    name: index.name.clone(),
                    is_stale,
                    state: index.state,
                }
            })
            .collect::<Vec<_>>();

        Ok(DatabaseStatistics {
            count_of_documents,
            count_of_indexes: infos.len() as u32,
            indexes: infos,
        })
    }

    async fn submit_patch(&self, operation: &PatchByQuery) -> Result<OperationId, StoreError> {
        let id = self.next_operation.fetch_add(1, Ordering::Relaxed);
        let fault = self.patch_fault.lock().ok().and_then(|mut f| f.take());

        let (total, outcome) = match fault {
            Some(reason) => (0, Err(reason)),
            None => {
                let mut docs = self
                    .documents
                    .lock()
                    .map_err(|_| StoreError::ResponseParsing("lock poisoned".into()))?;
                let mut details = Vec::new();
                for doc in docs.values_mut() {
                    if operation.query.matches(doc) {
                        operation.patch.apply(&mut doc.body);
                        details.push(PatchDetail {
                            id: doc.id.clone(),
                            status: PatchStatus::Patched,
                        });
                    }
                }
                let total = details.len() as u64;
                let result = BulkOperationResult {
                    message: format!("Processed {} items.", format_thousands(total)),
                    total: Some(total),
                    details: if operation.retrieve_details { details } else { Vec::new() },
                };
                (total, Ok(result))
            }
        };

        self.operations
            .lock()
            .map_err(|_| StoreError::ResponseParsing("lock poisoned".into()))?
            .insert(
                id,
                MemoryOperation {
                    initial_polls: self.config.operation_polls_until_done,
                    polls_remaining: self.config.operation_polls_until_done,
                    total,
                    outcome,
                },
            );
        if total > 0 {
            self.mark_indexes_stale();
        }
        Ok(OperationId(id))
    }

    async fn operation_state(&self, id: OperationId) -> Result<OperationState, StoreError> {
        let mut operations = self
            .operations
            .lock()
            .map_err(|_| StoreError::ResponseParsing("lock poisoned".into()))?;
        let op = operations
            .get_mut(&id.0)
            .ok_or(StoreError::UnknownOperation(id.0))?;

        if let Err(reason) = &op.outcome {
            return Ok(OperationState {
                status: OperationStatus::Faulted,
                progress: None,
                result: None,
                error: Some(reason.clone()),
            });
        }

        if op.polls_remaining > 0 {
            let done = u64::from(op.initial_polls - op.polls_remaining);
            let processed = op.total * done / u64::from(op.initial_polls);
            op.polls_remaining -= 1;
            return Ok(OperationState {
                status: OperationStatus::InProgress,
                progress: Some(DeterminateProgress {
                    processed,
                    total: op.total,
                }),
                result: None,
                error: None,
            });
        }

        Ok(OperationState {
            status: OperationStatus::Completed,
            progress: Some(DeterminateProgress {
                processed: op.total,
                total: op.total,
            }),
            result: op.outcome.clone().ok(),
            error: None,
        })
    }

    async fn store_document(&self, doc: StoredDocument) -> Result<(), StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::ResponseParsing("lock poisoned".into()))?
            .insert(doc.id.clone(), doc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn indexes_converge_after_configured_polls() {
        let store = InMemoryStore::with_config(
            "Mem",
            MemoryStoreConfig {
                index_stale_polls: 2,
                ..Default::default()
            },
        );
        store
            .put_indexes(&crate::store::indexes::harness_indexes())
            .await
            .unwrap();

        assert_eq!(store.statistics().await.unwrap().stale_index_names().len(), 3);
        assert_eq!(store.statistics().await.unwrap().stale_index_names().len(), 3);
        let stats = store.statistics().await.unwrap();
        assert!(stats.stale_index_names().is_empty());
        assert_eq!(stats.count_of_indexes, 3);
        assert_eq!(store.statistics_calls(), 3);
    }

    #[tokio::test]
    async fn writes_make_indexes_stale_again() {
        let store = InMemoryStore::new("Mem");
        store.seed_index("I", IndexState::Normal, 0);
        assert!(store.statistics().await.unwrap().stale_index_names().is_empty());

        store
            .bulk_insert(vec![StoredDocument {
                id: "a".into(),
                collection: "Payments".into(),
                body: json!({}),
            }])
            .await
            .unwrap();
        assert_eq!(store.statistics().await.unwrap().stale_index_names(), vec!["I".to_string()]);
    }

    #[tokio::test]
    async fn disabled_index_is_never_stale() {
        let store = InMemoryStore::new("Mem");
        store.seed_index("Off", IndexState::Disabled, 10);
        let stats = store.statistics().await.unwrap();
        assert!(stats.stale_index_names().is_empty());
        assert_eq!(stats.count_of_indexes, 1);
    }

    #[tokio::test]
    async fn insert_budget_rejects_after_exhaustion() {
        let store = InMemoryStore::new("Mem");
        store.fail_inserts_after(1);
        let doc = || StoredDocument {
            id: uuid::Uuid::new_v4().to_string(),
            collection: "Charges".into(),
            body: json!({}),
        };
        assert_eq!(store.bulk_insert(vec![doc()]).await.unwrap(), 1);
        assert!(store.bulk_insert(vec![doc()]).await.is_err());
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn store_document_overwrites() {
        let store = InMemoryStore::new("Mem");
        let doc = |v: i32| StoredDocument {
            id: "Report-1".into(),
            collection: "Reports".into(),
            body: json!({ "v": v }),
        };
        store.store_document(doc(1)).await.unwrap();
        store.store_document(doc(2)).await.unwrap();
        assert_eq!(store.document_count(), 1);
        assert_eq!(store.document("Report-1").unwrap().body["v"], 2);
    }
}
