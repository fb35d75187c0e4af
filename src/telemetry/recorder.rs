//! Status sampling: host resources, database counts and derived rates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::host::{HostProbe, HostReading};
use super::report::RunReport;
use super::snapshot::{DatabaseSnapshot, SnapshotRefresher};

/// One telemetry sample. Append-only once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "CPUPercentage")]
    pub cpu_percentage: f32,
    #[serde(rename = "CommittedRAMTotal")]
    pub committed_ram_total: u64,
    #[serde(rename = "CommittedRAMPeak")]
    pub committed_ram_peak: u64,
    #[serde(rename = "PhysicalRAMTotal")]
    pub physical_ram_total: u64,
    #[serde(rename = "PhysicalRAMAvailable")]
    pub physical_ram_available: u64,
    #[serde(rename = "PhysicalRAMFreePerc")]
    pub physical_ram_free_perc: f64,
    #[serde(rename = "PhysicalRAMOccupiedPerc")]
    pub physical_ram_occupied_perc: f64,
    pub docs_in_db: u64,
    pub import_rate_per_minute: f64,
    pub patching_rate_per_minute: f64,
    pub patched_doc_count: u64,
    pub status: String,
}

/// Items per minute between `start` and `last`.
///
/// Zero unless both timestamps are present, `count` is positive and the
/// interval is positive. Never NaN or infinite.
pub fn rate_per_minute(
    count: u64,
    start: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
) -> f64 {
    let (Some(start), Some(last)) = (start, last) else {
        return 0.0;
    };
    if count == 0 {
        return 0.0;
    }
    let minutes = (last - start).num_milliseconds() as f64 / 60_000.0;
    if minutes <= 0.0 {
        return 0.0;
    }
    let rate = count as f64 / minutes;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuSummary {
    pub max: f32,
    pub avg: f32,
}

/// Max and mean over a CPU history. Zero for an empty history.
pub fn summarize_cpu(history: &[f32]) -> CpuSummary {
    if history.is_empty() {
        return CpuSummary::default();
    }
    let max = history.iter().copied().fold(f32::MIN, f32::max);
    let avg = history.iter().sum::<f32>() / history.len() as f32;
    CpuSummary { max, avg }
}

/// Produces samples and appends them to the run report.
pub struct TelemetryRecorder {
    report: Arc<RunReport>,
    refresher: Arc<SnapshotRefresher>,
    probe: Mutex<Box<dyn HostProbe>>,
    committed_peak: AtomicU64,
}

impl TelemetryRecorder {
    pub fn new(
        report: Arc<RunReport>,
        refresher: Arc<SnapshotRefresher>,
        probe: Box<dyn HostProbe>,
    ) -> Self {
        Self {
            report,
            refresher,
            probe: Mutex::new(probe),
            committed_peak: AtomicU64::new(0),
        }
    }

    pub fn report(&self) -> &Arc<RunReport> {
        &self.report
    }

    pub fn refresher(&self) -> &Arc<SnapshotRefresher> {
        &self.refresher
    }

    fn read_host(&self) -> HostReading {
        self.probe
            .lock()
            .map(|mut p| p.read())
            .unwrap_or_default()
    }

    /// Build a sample from the current snapshot and host, append it to the
    /// history and return it. Does not touch the store.
    pub fn sample(&self, status: impl Into<String>) -> Sample {
        let snapshot = self.refresher.current();
        let sample = self.build_sample(&snapshot, status.into());
        self.report.push_sample(sample.clone());
        sample
    }

    /// The import rate uses the writes acknowledged so far, which advance
    /// together with `import_last_update` on every flush. The snapshot's
    /// document count can lag by up to one refresh interval.
    fn build_sample(&self, snapshot: &DatabaseSnapshot, status: String) -> Sample {
        let host = self.read_host();
        let peak = self
            .committed_peak
            .fetch_max(host.committed, Ordering::Relaxed)
            .max(host.committed);
        let timeline = self.report.timeline();
        let patched = self.report.counters.patched();

        Sample {
            timestamp: Utc::now(),
            cpu_percentage: host.cpu_percent,
            committed_ram_total: host.committed,
            committed_ram_peak: peak,
            physical_ram_total: host.physical_total,
            physical_ram_available: host.physical_available,
            physical_ram_free_perc: host.free_percent(),
            physical_ram_occupied_perc: host.occupied_percent(),
            docs_in_db: snapshot.document_count,
            import_rate_per_minute: rate_per_minute(
                self.report.counters.written(),
                timeline.import_started,
                timeline.import_last_update,
            ),
            patching_rate_per_minute: rate_per_minute(
                patched,
                timeline.patch_started,
                timeline.patch_last_update,
            ),
            patched_doc_count: patched,
            status,
        }
    }

    /// Refresh the snapshot (rate-limited), record a sample and emit it as a
    /// structured event. A failed refresh is logged and the last snapshot
    /// is used; status reporting never fails the run.
    pub async fn report_status(&self, status: impl Into<String>) -> Sample {
        let snapshot = match self.refresher.refresh(false).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot refresh failed, reporting last known state");
                self.refresher.current()
            }
        };

        let sample = self.build_sample(&snapshot, status.into());
        self.report.push_sample(sample.clone());

        let latest_error = self.report.latest_error();
        tracing::info!(
            status = %sample.status,
            cpu = sample.cpu_percentage,
            ram_free_pct = %format!("{:.1}", sample.physical_ram_free_perc),
            committed_mb = sample.committed_ram_total / (1024 * 1024),
            committed_peak_mb = sample.committed_ram_peak / (1024 * 1024),
            docs = sample.docs_in_db,
            indexes = snapshot.index_count,
            stale_indexes = ?snapshot.stale_index_names,
            import_rate = %format!("{:.0}", sample.import_rate_per_minute),
            patch_rate = %format!("{:.0}", sample.patching_rate_per_minute),
            patched = sample.patched_doc_count,
            last_error = %latest_error.as_ref().map(|e| e.trace()).unwrap_or_default(),
            "Status"
        );
        sample
    }

    /// CPU max/avg recomputed over a copy of the full history.
    pub fn cpu_summary(&self) -> CpuSummary {
        let history = self.report.history();
        summarize_cpu(&history.iter().map(|s| s.cpu_percentage).collect::<Vec<_>>())
    }
}
