//! Rate-limited view of the store's statistics.
//!
//! Every phase needs the document count and index staleness, but statistics
//! calls are not free on a busy server. Refreshes happen at most once per
//! [`REFRESH_INTERVAL`] unless forced.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{DocumentStore, IndexInformation, StoreError};

/// Minimum spacing between unforced refreshes.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Last observed database state. Not persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseSnapshot {
    pub document_count: u64,
    pub index_count: u32,
    /// Indexes that are not disabled.
    pub indexes: Vec<IndexInformation>,
    pub stale_index_names: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Document count at the first successful refresh of the run.
    pub initial_document_count: Option<u64>,
}

impl DatabaseSnapshot {
    /// Documents added since the first refresh.
    pub fn documents_added(&self) -> u64 {
        self.document_count
            .saturating_sub(self.initial_document_count.unwrap_or(self.document_count))
    }

    pub fn is_converged(&self) -> bool {
        self.stale_index_names.is_empty()
    }
}

struct RefresherState {
    snapshot: DatabaseSnapshot,
    last_refresh: Option<Instant>,
}

pub struct SnapshotRefresher {
    store: Arc<dyn DocumentStore>,
    min_interval: Duration,
    state: Mutex<RefresherState>,
}

impl SnapshotRefresher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_min_interval(store, REFRESH_INTERVAL)
    }

    pub fn with_min_interval(store: Arc<dyn DocumentStore>, min_interval: Duration) -> Self {
        Self {
            store,
            min_interval,
            state: Mutex::new(RefresherState {
                snapshot: DatabaseSnapshot::default(),
                last_refresh: None,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Latest snapshot without touching the store.
    pub fn current(&self) -> DatabaseSnapshot {
        self.state
            .lock()
            .map(|s| s.snapshot.clone())
            .unwrap_or_default()
    }

    fn is_due(&self) -> bool {
        self.state
            .lock()
            .map(|s| match s.last_refresh {
                Some(at) => at.elapsed() > self.min_interval,
                None => true,
            })
            .unwrap_or(true)
    }

    /// Refresh from the store when forced or when the interval has elapsed;
    /// otherwise return the cached snapshot. Store errors propagate.
    pub async fn refresh(&self, force: bool) -> Result<DatabaseSnapshot, StoreError> {
        if !force && !self.is_due() {
            return Ok(self.current());
        }

        let stats = self.store.statistics().await?;

        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::ResponseParsing("snapshot lock poisoned".into()))?;
        let snapshot = &mut state.snapshot;
        snapshot.stale_index_names = stats.stale_index_names();
        snapshot.indexes = stats.active_indexes().cloned().collect();
        snapshot.document_count = stats.count_of_documents;
        snapshot.index_count = stats.count_of_indexes;
        snapshot.refreshed_at = Some(Utc::now());
        if snapshot.initial_document_count.is_none() {
            snapshot.initial_document_count = Some(stats.count_of_documents);
        }
        let result = snapshot.clone();
        state.last_refresh = Some(Instant::now());

        tracing::debug!(
            documents = result.document_count,
            indexes = result.index_count,
            stale = result.stale_index_names.len(),
            "Database snapshot refreshed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IndexState, InMemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn unforced_refresh_is_rate_limited() {
        let store = Arc::new(InMemoryStore::new("Snap"));
        let refresher = SnapshotRefresher::with_min_interval(store.clone(), Duration::from_secs(60));

        refresher.refresh(false).await.unwrap();
        refresher.refresh(false).await.unwrap();
        refresher.refresh(false).await.unwrap();
        assert_eq!(store.statistics_calls(), 1);
    }

    #[tokio::test]
    async fn forced_refresh_always_hits_store() {
        let store = Arc::new(InMemoryStore::new("Snap"));
        let refresher = SnapshotRefresher::with_min_interval(store.clone(), Duration::from_secs(60));

        refresher.refresh(true).await.unwrap();
        store.seed_document("Charges", "Charge-1", json!({}));
        let snap = refresher.refresh(true).await.unwrap();
        assert_eq!(store.statistics_calls(), 2);
        assert_eq!(snap.document_count, 1);
    }

    #[tokio::test]
    async fn first_refresh_captures_baseline() {
        let store = Arc::new(InMemoryStore::new("Snap"));
        store.seed_document("Charges", "Charge-0", json!({}));
        let refresher = SnapshotRefresher::new(store.clone());

        let first = refresher.refresh(true).await.unwrap();
        assert_eq!(first.initial_document_count, Some(1));
        assert_eq!(first.documents_added(), 0);

        store.seed_document("Charges", "Charge-1", json!({}));
        store.seed_document("Charges", "Charge-2", json!({}));
        let later = refresher.refresh(true).await.unwrap();
        assert_eq!(later.initial_document_count, Some(1));
        assert_eq!(later.documents_added(), 2);
    }

    #[tokio::test]
    async fn snapshot_excludes_disabled_indexes() {
        let store = Arc::new(InMemoryStore::new("Snap"));
        store.seed_index("Live", IndexState::Normal, 5);
        store.seed_index("Off", IndexState::Disabled, 5);
        let refresher = SnapshotRefresher::new(store);

        let snap = refresher.refresh(true).await.unwrap();
        assert_eq!(snap.indexes.len(), 1);
        assert_eq!(snap.stale_index_names, vec!["Live".to_string()]);
        assert_eq!(snap.index_count, 2);
        assert!(!snap.is_converged());
    }

    #[test]
    fn current_before_refresh_is_empty() {
        let refresher = SnapshotRefresher::new(Arc::new(InMemoryStore::new("Snap")));
        let snap = refresher.current();
        assert!(snap.refreshed_at.is_none());
        assert!(snap.is_converged());
    }
}
