//! Tracking for long-running server-side operations.

use std::sync::Arc;
use std::time::Duration;

use super::error::StoreError;
use super::traits::DocumentStore;
use super::types::*;

/// How often operation state is polled.
pub const DEFAULT_OPERATION_POLL: Duration = Duration::from_millis(500);

/// Handle to a submitted operation. Polls until the operation completes,
/// faults or is cancelled; there is no client-side deadline.
pub struct OperationHandle {
    store: Arc<dyn DocumentStore>,
    id: OperationId,
    poll_interval: Duration,
}

impl OperationHandle {
    pub fn new(store: Arc<dyn DocumentStore>, id: OperationId) -> Self {
        Self {
            store,
            id,
            poll_interval: DEFAULT_OPERATION_POLL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Wait for the operation to finish, calling `on_progress` each time the
    /// reported progress changes.
    pub async fn wait_for_completion<F>(&self, mut on_progress: F) -> Result<BulkOperationResult, StoreError>
    where
        F: FnMut(DeterminateProgress),
    {
        let mut last_progress: Option<DeterminateProgress> = None;

        loop {
            let state = self.store.operation_state(self.id).await?;

            if let Some(progress) = state.progress {
                if last_progress != Some(progress) {
                    on_progress(progress);
                    last_progress = Some(progress);
                }
            }

            match state.status {
                OperationStatus::Completed => {
                    tracing::debug!(operation = %self.id, "Operation completed");
                    return Ok(state.result.unwrap_or_default());
                }
                OperationStatus::Faulted | OperationStatus::Canceled => {
                    return Err(StoreError::OperationFaulted {
                        id: self.id.0,
                        reason: state
                            .error
                            .unwrap_or_else(|| format!("{:?}", state.status)),
                    });
                }
                OperationStatus::InProgress => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{TagReference, User};
    use crate::store::memory::{InMemoryStore, MemoryStoreConfig};
    use crate::store::query::{IndexQuery, PatchByQuery, TagPatch};
    use chrono::Utc;
    use serde_json::json;

    fn patch_all_payments() -> PatchByQuery {
        PatchByQuery {
            query: IndexQuery::for_index("PaymentDataSearchIndex", "Payments")
                .where_less_than("Amount", 0.0),
            patch: TagPatch::new(
                TagReference {
                    id: "Tag-1".into(),
                    name: "T".into(),
                },
                User {
                    id: "User-1".into(),
                    name: "U".into(),
                    user_name: "u@example.com".into(),
                },
                Utc::now(),
            ),
            allow_stale: true,
            retrieve_details: true,
        }
    }

    #[tokio::test]
    async fn reports_progress_then_result() {
        let store = Arc::new(InMemoryStore::with_config(
            "Ops",
            MemoryStoreConfig {
                operation_polls_until_done: 2,
                ..Default::default()
            },
        ));
        store.seed_document("Payments", "Payment-1", json!({ "Amount": -10.0 }));
        store.seed_document("Payments", "Payment-2", json!({ "Amount": -20.0 }));

        let id = store.submit_patch(&patch_all_payments()).await.unwrap();
        let handle = OperationHandle::new(store.clone(), id).with_poll_interval(Duration::from_millis(1));

        let mut seen = Vec::new();
        let result = handle
            .wait_for_completion(|p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(result.total, Some(2));
        assert_eq!(result.message, "Processed 2 items.");
        assert!(!seen.is_empty());
        assert_eq!(seen.last().unwrap().processed, 2);
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error() {
        let store = Arc::new(InMemoryStore::new("Ops"));
        let handle = OperationHandle::new(store, OperationId(99));
        let err = handle.wait_for_completion(|_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownOperation(99)));
    }

    #[tokio::test]
    async fn faulted_operation_is_an_error() {
        let store = Arc::new(InMemoryStore::new("Ops"));
        store.fail_next_patch("index is corrupted");
        let id = store.submit_patch(&patch_all_payments()).await.unwrap();
        let handle = OperationHandle::new(store, id).with_poll_interval(Duration::from_millis(1));
        let err = handle.wait_for_completion(|_| {}).await.unwrap_err();
        assert!(err.to_string().contains("index is corrupted"));
    }
}
