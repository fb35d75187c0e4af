//! Run orchestration.
//!
//! Store modes run the phases in order:
//! ```text
//! startup wait → import → index creation → patch (background) → wait → join patch
//! ```
//! A phase failure stops the remaining phases, is captured into the run
//! report, and the report is still persisted. The report is persisted
//! exactly once, after everything else.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use super::convergence::{IndexConvergenceWaiter, PollPolicy};
use super::disk::{gb_to_bytes, DiskBenchmark, DiskBenchmarkOutcome};
use super::error::HarnessError;
use super::import::ImportScheduler;
use super::patch::{payments_below, PatchDispatcher, PatchOutcome};
use crate::config::{HarnessSettings, RunMode};
use crate::records::{Tag, TagReference, User};
use crate::store::indexes::harness_indexes;
use crate::store::{DocumentStore, InMemoryStore, RavenHttpStore, StoreError, StoredDocument};
use crate::telemetry::{
    CapturedError, HostProbe, RunReport, RunReportDocument, SnapshotRefresher, SysinfoProbe,
    TelemetryRecorder,
};

/// Tag applied by the patch phase.
fn harness_tag() -> Tag {
    Tag {
        id: "Tag-MySecretTagId".to_string(),
        name: "SomeTag".to_string(),
        criteria: "Some Criteria - Does not matter".to_string(),
    }
}

/// Identity stamped into the audit block of patched documents.
fn harness_actor() -> User {
    User {
        id: "User-LoadHarness".to_string(),
        name: "Load Harness".to_string(),
        user_name: "harness@ledgerload.local".to_string(),
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// A store run. `failure` holds the error that stopped the phases early.
    Store {
        report: Box<RunReportDocument>,
        failure: Option<CapturedError>,
    },
    Disk(DiskBenchmarkOutcome),
}

/// Connect to the store the settings describe.
pub fn build_store(settings: &HarnessSettings) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match settings.mode {
        RunMode::Memory => Ok(Arc::new(InMemoryStore::new(&settings.database_id))),
        _ => {
            let store = match &settings.cert_path {
                Some(cert) => RavenHttpStore::with_certificate(
                    &settings.raven_url,
                    &settings.database_id,
                    cert,
                    &settings.cert_password,
                )?,
                None => RavenHttpStore::new(&settings.raven_url, &settings.database_id)?,
            };
            Ok(Arc::new(store))
        }
    }
}

/// Run whatever the settings' mode selects.
pub async fn run(settings: &HarnessSettings) -> Result<RunOutcome, HarnessError> {
    tracing::info!(mode = %settings.mode, database = %settings.database_id, "Starting run");
    match settings.mode {
        RunMode::File => Ok(RunOutcome::Disk(run_disk_benchmark(settings).await?)),
        RunMode::Raven | RunMode::Memory => {
            let store = build_store(settings)?;
            let policy = PollPolicy::every(settings.poll_interval())
                .with_jitter(settings.poll_jitter())
                .with_max_wait(settings.max_index_wait());
            run_with_store(store, settings, Box::new(SysinfoProbe::new()), policy).await
        }
    }
}

/// Run the store phases against `store` and persist the report.
pub async fn run_with_store(
    store: Arc<dyn DocumentStore>,
    settings: &HarnessSettings,
    probe: Box<dyn HostProbe>,
    policy: PollPolicy,
) -> Result<RunOutcome, HarnessError> {
    let report = Arc::new(RunReport::new(store.url(), store.database(), &settings.note));
    let refresher = Arc::new(SnapshotRefresher::new(store.clone()));
    let recorder = Arc::new(TelemetryRecorder::new(report.clone(), refresher, probe));

    let failure = match run_phases(&store, &recorder, settings, policy).await {
        Ok(()) => None,
        Err(e) => {
            tracing::error!(error = %e, "Run stopped early");
            Some(report.capture_error(&e))
        }
    };

    let cpu = recorder.cpu_summary();
    let document = persist_report(store.as_ref(), &recorder).await?;
    tracing::info!(
        report = %document.id,
        docs = document.count_of_documents,
        patched = document.count_of_docs_patched,
        max_cpu = cpu.max,
        avg_cpu = cpu.avg,
        failed = failure.is_some(),
        "Complete"
    );

    Ok(RunOutcome::Store {
        report: Box::new(document),
        failure,
    })
}

async fn run_phases(
    store: &Arc<dyn DocumentStore>,
    recorder: &Arc<TelemetryRecorder>,
    settings: &HarnessSettings,
    policy: PollPolicy,
) -> Result<(), HarnessError> {
    let report = recorder.report();
    let waiter = IndexConvergenceWaiter::new(recorder.clone());

    // Fails fast when the store is unreachable, and fixes the import baseline
    recorder.refresher().refresh(true).await?;
    if settings.wait_for_indexes_to_not_be_stale {
        waiter.wait_for_convergence(policy).await?;
    }
    recorder
        .report_status(format!("Starting {} Mode", settings.mode))
        .await;

    if settings.import_docs {
        ImportScheduler::new(store.clone(), recorder.clone())
            .run_import(
                settings.minimum_document_count,
                settings.max_insert_threads,
                settings.count_of_docs_to_insert_per_thread,
            )
            .await?;
    }

    if settings.create_indexes {
        report.update_timeline(|t| t.indexes_started = Some(Utc::now()));
        recorder.report_status("Creating indexes").await;
        store.put_indexes(&harness_indexes()).await?;
        if settings.wait_for_indexes_to_not_be_stale {
            waiter.wait_for_convergence(policy).await?;
        }
        report.update_timeline(|t| t.indexes_finished = Some(Utc::now()));
        tracing::info!(
            minutes = report.timeline().index_creation_minutes().unwrap_or_default(),
            "Indexes created"
        );
    }

    let patch = if settings.patch_docs {
        recorder.report_status("Starting Patching").await;
        let task = PatchDispatcher::new(store.clone(), recorder.clone()).spawn_tag_patch(
            payments_below(settings.patch_amount_threshold),
            TagReference::from_tag(&harness_tag()),
            harness_actor(),
        );
        recorder.report_status("Patching Command(s) sent").await;
        Some(task)
    } else {
        None
    };

    // The patch is joined even when this wait fails, so the report never
    // misses a patch that is still running.
    let final_wait = if settings.wait_for_indexes_to_not_be_stale {
        waiter.wait_for_convergence(policy).await.map(|_| ())
    } else {
        Ok(())
    };

    if let Some(task) = patch {
        match task.join().await {
            Ok(PatchOutcome::Completed(summary)) => {
                recorder
                    .report_status(format!("Patched {} documents", summary.processed))
                    .await;
            }
            // Already captured by the dispatcher
            Ok(PatchOutcome::Failed(_)) => {}
            Err(e) => {
                report.capture_error(&e);
            }
        }
    }
    final_wait?;

    recorder.report_status("Complete").await;
    Ok(())
}

/// Store the run report. Once a write succeeds, later calls write nothing.
async fn persist_report(
    store: &dyn DocumentStore,
    recorder: &TelemetryRecorder,
) -> Result<RunReportDocument, HarnessError> {
    let report = recorder.report();
    let snapshot = match recorder.refresher().refresh(true).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(error = %e, "Final snapshot refresh failed, using last known state");
            recorder.refresher().current()
        }
    };
    let document = report.to_document(&snapshot);

    if !report.begin_persist() {
        tracing::warn!(report = %document.id, "Run report already persisted, skipping");
        return Ok(document);
    }
    let stored = match StoredDocument::from_entity(&document) {
        Ok(doc) => store.store_document(doc).await,
        Err(e) => Err(e),
    };
    if let Err(e) = stored {
        // Not written, so a later attempt may still persist it
        report.release_persist();
        return Err(e.into());
    }
    tracing::info!(report = %document.id, "Run report stored");
    Ok(document)
}

async fn run_disk_benchmark(settings: &HarnessSettings) -> Result<DiskBenchmarkOutcome, HarnessError> {
    // Keeps a generated scratch directory alive until the benchmark ends
    let (dir, _scratch): (PathBuf, Option<tempfile::TempDir>) = match &settings.temp_dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let scratch = tempfile::tempdir()?;
            (scratch.path().to_path_buf(), Some(scratch))
        }
    };

    let bench = DiskBenchmark {
        dir,
        small_file_count: settings.count_of_small_files_to_write,
        small_file_bytes: gb_to_bytes(settings.small_file_size_in_gb),
        large_file_bytes: gb_to_bytes(settings.large_file_size_in_gb),
    };
    tracing::info!(dir = %bench.dir.display(), "Starting File Mode");

    let outcome = tokio::task::spawn_blocking(move || bench.run())
        .await
        .map_err(std::io::Error::other)??;
    tracing::info!("Complete");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query::PatchByQuery;
    use crate::store::{
        DatabaseStatistics, IndexDefinition, InMemoryStore, OperationId, OperationState,
    };
    use crate::telemetry::{HostReading, StaticProbe};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    /// In-memory store whose statistics go dark after a number of calls and
    /// whose report writes can be made to fail.
    struct FlakyStore {
        inner: InMemoryStore,
        healthy_statistics: u64,
        statistics_calls: AtomicU64,
        reject_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new(healthy_statistics: u64) -> Self {
            Self {
                inner: InMemoryStore::new("Harness"),
                healthy_statistics,
                statistics_calls: AtomicU64::new(0),
                reject_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn url(&self) -> &str {
            self.inner.url()
        }

        fn database(&self) -> &str {
            self.inner.database()
        }

        async fn bulk_insert(&self, docs: Vec<StoredDocument>) -> Result<usize, StoreError> {
            self.inner.bulk_insert(docs).await
        }

        async fn put_indexes(&self, definitions: &[IndexDefinition]) -> Result<(), StoreError> {
            self.inner.put_indexes(definitions).await
        }

        async fn statistics(&self) -> Result<DatabaseStatistics, StoreError> {
            let call = self.statistics_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.healthy_statistics {
                return Err(StoreError::Connection(self.url().to_string()));
            }
            self.inner.statistics().await
        }

        async fn submit_patch(&self, operation: &PatchByQuery) -> Result<OperationId, StoreError> {
            self.inner.submit_patch(operation).await
        }

        async fn operation_state(&self, id: OperationId) -> Result<OperationState, StoreError> {
            self.inner.operation_state(id).await
        }

        async fn store_document(&self, doc: StoredDocument) -> Result<(), StoreError> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.inner.store_document(doc).await
        }
    }

    fn probe() -> Box<dyn HostProbe> {
        Box::new(StaticProbe::constant(HostReading {
            cpu_percent: 12.5,
            physical_total: 8 << 30,
            physical_available: 4 << 30,
            committed: 2 << 30,
        }))
    }

    fn fast() -> PollPolicy {
        PollPolicy::every(Duration::from_millis(1))
    }

    fn memory_settings() -> HarnessSettings {
        HarnessSettings {
            mode: RunMode::Memory,
            database_id: "Harness".into(),
            note: "unit".into(),
            minimum_document_count: 120,
            max_insert_threads: 3,
            count_of_docs_to_insert_per_thread: 20,
            ..Default::default()
        }
    }

    fn stored_reports(store: &InMemoryStore, id: &str) -> Option<StoredDocument> {
        store.document(id).filter(|d| d.collection == "Reporters")
    }

    #[tokio::test]
    async fn memory_run_executes_every_phase() {
        let store = Arc::new(InMemoryStore::new("Harness"));
        let settings = memory_settings();

        let outcome = run_with_store(store.clone(), &settings, probe(), fast())
            .await
            .unwrap();

        let RunOutcome::Store { report, failure } = outcome else {
            panic!("store run expected");
        };
        assert!(failure.is_none(), "unexpected failure: {failure:?}");
        assert!(report.count_of_documents >= 120);
        assert!(report.import_start_date.is_some());
        assert!(report.indexes_creation_end.is_some());
        assert!(report.patching_start_date.is_some());
        assert_eq!(report.count_of_indexes, 3);
        assert_eq!(report.max_cpu, 12.5);
        assert!(report.stats.iter().any(|s| s.status == "Complete"));

        let stored = stored_reports(&store, &report.id).expect("report persisted");
        assert_eq!(stored.body["Note"], "unit");
        assert_eq!(stored.body["DatabaseId"], "Harness");
    }

    #[tokio::test]
    async fn import_failure_is_captured_and_report_still_persisted() {
        let store = Arc::new(InMemoryStore::new("Harness"));
        store.fail_inserts_after(0);
        let settings = memory_settings();

        let outcome = run_with_store(store.clone(), &settings, probe(), fast())
            .await
            .unwrap();

        let RunOutcome::Store { report, failure } = outcome else {
            panic!("store run expected");
        };
        let failure = failure.expect("import should fail");
        assert!(failure.trace().contains("injected insert failure"));
        assert_eq!(report.exception_message.as_deref(), Some(failure.message.as_str()));
        assert!(report.indexes_creation_start.is_none());
        assert!(stored_reports(&store, &report.id).is_some());
    }

    #[tokio::test]
    async fn phases_can_be_disabled() {
        let store = Arc::new(InMemoryStore::new("Harness"));
        let settings = HarnessSettings {
            import_docs: false,
            create_indexes: false,
            patch_docs: false,
            ..memory_settings()
        };

        let outcome = run_with_store(store.clone(), &settings, probe(), fast())
            .await
            .unwrap();
        let RunOutcome::Store { report, failure } = outcome else {
            panic!("store run expected");
        };
        assert!(failure.is_none());
        assert_eq!(report.count_of_documents, 0);
        assert!(report.import_start_date.is_none());
        // Only the report itself was written
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn failed_final_wait_still_joins_the_patch() {
        // Startup refresh, startup wait and its final refresh succeed; the
        // wait after patch dispatch loses the store.
        let store = Arc::new(FlakyStore::new(3));
        for i in 0..5 {
            store.inner.seed_document(
                "Payments",
                &format!("Payment-{i}"),
                json!({ "Amount": -6000.0, "Tags": [] }),
            );
        }
        let settings = HarnessSettings {
            import_docs: false,
            create_indexes: false,
            ..memory_settings()
        };

        let outcome = run_with_store(store.clone(), &settings, probe(), fast())
            .await
            .unwrap();
        let RunOutcome::Store { report, failure } = outcome else {
            panic!("store run expected");
        };

        let failure = failure.expect("final wait should fail");
        assert!(failure.message.contains("Index convergence failed"));
        assert!(report.patching_start_date.is_some());
        assert!(report.patching_end_date.is_some());
        assert_eq!(report.count_of_docs_patched, 5);

        let stored = stored_reports(&store.inner, &report.id).expect("report persisted");
        assert_eq!(stored.body["CountOfDocsPatched"], 5);
    }

    #[tokio::test]
    async fn patch_failure_is_absorbed_and_run_completes() {
        let store = Arc::new(InMemoryStore::new("Harness"));
        store.fail_next_patch("index is corrupted");
        let settings = memory_settings();

        let outcome = run_with_store(store.clone(), &settings, probe(), fast())
            .await
            .unwrap();
        let RunOutcome::Store { report, failure } = outcome else {
            panic!("store run expected");
        };

        assert!(failure.is_none(), "patch fault must not stop the run: {failure:?}");
        assert!(report
            .exception_message
            .as_deref()
            .is_some_and(|m| m.contains("index is corrupted")));
        assert!(report.patching_end_date.is_none());
        assert!(report.stats.iter().any(|s| s.status == "Complete"));
        assert!(stored_reports(&store, &report.id).is_some());
    }

    #[tokio::test]
    async fn failed_report_write_can_be_retried() {
        let store = Arc::new(FlakyStore::new(u64::MAX));
        store.reject_writes.store(true, Ordering::SeqCst);
        let report = Arc::new(RunReport::new(store.url(), store.database(), ""));
        let recorder = TelemetryRecorder::new(
            report.clone(),
            Arc::new(SnapshotRefresher::new(store.clone())),
            probe(),
        );

        assert!(persist_report(store.as_ref(), &recorder).await.is_err());
        assert!(!report.is_persisted());
        assert_eq!(store.inner.document_count(), 0);

        store.reject_writes.store(false, Ordering::SeqCst);
        persist_report(store.as_ref(), &recorder).await.unwrap();
        assert!(report.is_persisted());
        assert_eq!(store.inner.document_count(), 1);
    }

    #[tokio::test]
    async fn persist_happens_once() {
        let store = Arc::new(InMemoryStore::new("Harness"));
        let report = Arc::new(RunReport::new(store.url(), store.database(), ""));
        let recorder = TelemetryRecorder::new(
            report,
            Arc::new(SnapshotRefresher::new(store.clone())),
            probe(),
        );

        persist_report(store.as_ref(), &recorder).await.unwrap();
        persist_report(store.as_ref(), &recorder).await.unwrap();
        assert_eq!(store.document_count(), 1);
    }

    #[tokio::test]
    async fn file_mode_runs_disk_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HarnessSettings {
            mode: RunMode::File,
            temp_dir: Some(dir.path().to_path_buf()),
            count_of_small_files_to_write: 2,
            small_file_size_in_gb: 0.000_001,
            large_file_size_in_gb: 0.000_01,
            ..Default::default()
        };

        let RunOutcome::Disk(outcome) = run(&settings).await.unwrap() else {
            panic!("disk run expected");
        };
        assert_eq!(outcome.small_files, 2);
        assert!(dir.path().join("big-file.txt").exists());
    }

    #[test]
    fn memory_mode_builds_in_memory_store() {
        let store = build_store(&memory_settings()).unwrap();
        assert_eq!(store.url(), "memory://local");
        assert_eq!(store.database(), "Harness");
    }
}
