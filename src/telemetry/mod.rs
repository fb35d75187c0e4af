//! Run telemetry: rate-limited database snapshots, host resource sampling,
//! derived throughput rates and the run report persisted at exit.
//!
//! ```text
//! SnapshotRefresher ─┐
//! HostProbe ─────────┼─→ TelemetryRecorder ─→ RunReport (append-only samples)
//! RunCounters ───────┘
//! ```

pub mod host;
pub mod recorder;
pub mod report;
pub mod snapshot;

pub use host::{HostProbe, HostReading, StaticProbe, SysinfoProbe};
pub use recorder::{rate_per_minute, summarize_cpu, CpuSummary, Sample, TelemetryRecorder};
pub use report::{CapturedError, PhaseTimeline, RunCounters, RunReport, RunReportDocument};
pub use snapshot::{DatabaseSnapshot, SnapshotRefresher, REFRESH_INTERVAL};
