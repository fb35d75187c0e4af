//! Run report: the single audit document persisted when a run ends.
//!
//! The live [`RunReport`] is shared (behind `Arc`) by every phase. Counters
//! that parallel import workers touch are atomics; timestamps, the error
//! history and the sample history sit behind short-lived mutexes that are
//! never held across an await point.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::recorder::{rate_per_minute, summarize_cpu, Sample};
use super::snapshot::DatabaseSnapshot;
use crate::store::Document;

// ═══════════════════════════════════════════════════════════
// Counters
// ═══════════════════════════════════════════════════════════

/// Counts written from many tasks at once.
#[derive(Debug, Default)]
pub struct RunCounters {
    docs_written: AtomicU64,
    docs_patched: AtomicU64,
}

impl RunCounters {
    /// Add a completed batch; returns the new total.
    pub fn add_written(&self, n: u64) -> u64 {
        self.docs_written.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn written(&self) -> u64 {
        self.docs_written.load(Ordering::Relaxed)
    }

    /// Patched count is reported as an absolute value by the operation.
    pub fn set_patched(&self, n: u64) {
        self.docs_patched.store(n, Ordering::Relaxed);
    }

    pub fn patched(&self) -> u64 {
        self.docs_patched.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════
// Timeline
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTimeline {
    pub import_started: Option<DateTime<Utc>>,
    pub import_last_update: Option<DateTime<Utc>>,
    pub import_finished: Option<DateTime<Utc>>,
    pub indexes_started: Option<DateTime<Utc>>,
    pub indexes_finished: Option<DateTime<Utc>>,
    pub patch_started: Option<DateTime<Utc>>,
    pub patch_last_update: Option<DateTime<Utc>>,
    pub patch_finished: Option<DateTime<Utc>>,
}

impl PhaseTimeline {
    pub fn index_creation_minutes(&self) -> Option<f64> {
        match (self.indexes_started, self.indexes_finished) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 60_000.0),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Captured errors
// ═══════════════════════════════════════════════════════════

/// An error absorbed during the run: display message plus the chain of
/// underlying causes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapturedError {
    pub message: String,
    pub causes: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedError {
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            causes,
            captured_at: Utc::now(),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    /// Cause chain rendered one per line, innermost last.
    pub fn trace(&self) -> String {
        std::iter::once(self.message.as_str())
            .chain(self.causes.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n  caused by: ")
    }
}

// ═══════════════════════════════════════════════════════════
// Live report
// ═══════════════════════════════════════════════════════════

pub struct RunReport {
    id: String,
    store_url: String,
    database: String,
    note: String,
    started_at: DateTime<Utc>,
    pub counters: RunCounters,
    timeline: Mutex<PhaseTimeline>,
    errors: Mutex<Vec<CapturedError>>,
    history: Mutex<Vec<Sample>>,
    persisted: AtomicBool,
}

impl RunReport {
    pub fn new(store_url: &str, database: &str, note: &str) -> Self {
        let started_at = Utc::now();
        Self {
            id: report_id(started_at),
            store_url: store_url.to_string(),
            database: database.to_string(),
            note: note.to_string(),
            started_at,
            counters: RunCounters::default(),
            timeline: Mutex::new(PhaseTimeline::default()),
            errors: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            persisted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Mutate the phase timestamps.
    pub fn update_timeline<R>(&self, f: impl FnOnce(&mut PhaseTimeline) -> R) -> Option<R> {
        self.timeline.lock().ok().map(|mut t| f(&mut *t))
    }

    pub fn timeline(&self) -> PhaseTimeline {
        self.timeline
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// A worker finished a batch of `n` documents.
    pub fn record_written(&self, n: u64) -> u64 {
        let total = self.counters.add_written(n);
        self.update_timeline(|t| t.import_last_update = Some(Utc::now()));
        total
    }

    /// The patch operation reported `processed` documents so far.
    pub fn record_patch_progress(&self, processed: u64) {
        self.counters.set_patched(processed);
        self.update_timeline(|t| t.patch_last_update = Some(Utc::now()));
    }

    // ── Errors ──────────────────────────────────────────────

    /// Append an error to the history and return what was recorded.
    pub fn capture_error(&self, err: &(dyn StdError + 'static)) -> CapturedError {
        self.push_error(CapturedError::from_error(err))
    }

    pub fn capture_message(&self, message: impl Into<String>) -> CapturedError {
        self.push_error(CapturedError::from_message(message))
    }

    fn push_error(&self, captured: CapturedError) -> CapturedError {
        tracing::error!(error = %captured.trace(), "Error captured in run report");
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(captured.clone());
        }
        captured
    }

    pub fn errors(&self) -> Vec<CapturedError> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn latest_error(&self) -> Option<CapturedError> {
        self.errors.lock().ok().and_then(|e| e.last().cloned())
    }

    // ── Samples ─────────────────────────────────────────────

    pub fn push_sample(&self, sample: Sample) {
        if let Ok(mut history) = self.history.lock() {
            history.push(sample);
        }
    }

    /// Copy of the sample history, stable against concurrent appends.
    pub fn history(&self) -> Vec<Sample> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    // ── Persistence ─────────────────────────────────────────

    /// Claim the single persistence slot. Returns `false` if the report has
    /// already been (or is being) persisted.
    pub fn begin_persist(&self) -> bool {
        !self.persisted.swap(true, Ordering::SeqCst)
    }

    /// Give the slot back after a failed write.
    pub fn release_persist(&self) {
        self.persisted.store(false, Ordering::SeqCst);
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Freeze the live report into its persisted shape.
    pub fn to_document(&self, snapshot: &DatabaseSnapshot) -> RunReportDocument {
        let timeline = self.timeline();
        let history = self.history();
        let errors = self.errors();
        let latest = errors.last().cloned();
        let cpu = summarize_cpu(&history.iter().map(|s| s.cpu_percentage).collect::<Vec<_>>());
        let imported = snapshot.documents_added();
        let patched = self.counters.patched();

        RunReportDocument {
            id: self.id.clone(),
            url: self.store_url.clone(),
            database_id: self.database.clone(),
            note: self.note.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            import_start_date: timeline.import_started,
            import_end_date: timeline.import_finished,
            count_of_docs_imported: imported,
            count_of_docs_written: self.counters.written(),
            import_rate_per_minute: rate_per_minute(
                imported,
                timeline.import_started,
                timeline.import_last_update,
            ),
            indexes_creation_start: timeline.indexes_started,
            indexes_creation_end: timeline.indexes_finished,
            index_creation_mins: timeline.index_creation_minutes(),
            patching_start_date: timeline.patch_started,
            patching_end_date: timeline.patch_finished,
            count_of_docs_patched: patched,
            patching_rate_per_minute: rate_per_minute(
                patched,
                timeline.patch_started,
                timeline.patch_last_update,
            ),
            count_of_documents: snapshot.document_count,
            count_of_indexes: snapshot.index_count,
            max_cpu: cpu.max,
            avg_cpu: cpu.avg,
            exception_message: latest.as_ref().map(|e| e.message.clone()),
            stack_trace: latest.as_ref().map(CapturedError::trace),
            exceptions: errors,
            stats: history,
        }
    }
}

/// `Reporter-2024-03-01_12_30_05_123` style identifier, unique per start time.
fn report_id(at: DateTime<Utc>) -> String {
    format!("Reporter-{}", at.format("%Y-%m-%d_%H_%M_%S_%3f"))
}

// ═══════════════════════════════════════════════════════════
// Persisted shape
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunReportDocument {
    #[serde(skip)]
    pub id: String,
    pub url: String,
    pub database_id: String,
    pub note: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub import_start_date: Option<DateTime<Utc>>,
    pub import_end_date: Option<DateTime<Utc>>,
    pub count_of_docs_imported: u64,
    pub count_of_docs_written: u64,
    pub import_rate_per_minute: f64,
    pub indexes_creation_start: Option<DateTime<Utc>>,
    pub indexes_creation_end: Option<DateTime<Utc>>,
    pub index_creation_mins: Option<f64>,
    pub patching_start_date: Option<DateTime<Utc>>,
    pub patching_end_date: Option<DateTime<Utc>>,
    pub count_of_docs_patched: u64,
    pub patching_rate_per_minute: f64,
    pub count_of_documents: u64,
    pub count_of_indexes: u32,
    #[serde(rename = "MaxCPU")]
    pub max_cpu: f32,
    #[serde(rename = "AvgCPU")]
    pub avg_cpu: f32,
    pub exception_message: Option<String>,
    pub stack_trace: Option<String>,
    pub exceptions: Vec<CapturedError>,
    pub stats: Vec<Sample>,
}

impl Document for RunReportDocument {
    const COLLECTION: &'static str = "Reporters";

    fn id(&self) -> &str {
        &self.id
    }
}
