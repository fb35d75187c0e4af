//! Waiting for secondary indexes to catch up with writes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use super::error::ConvergenceError;
use crate::telemetry::{DatabaseSnapshot, TelemetryRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceState {
    Waiting,
    Converged,
}

/// Poll cadence. Without `max_wait` the wait is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Upper bound of a random delay added to each interval.
    pub jitter: Duration,
    pub max_wait: Option<Duration>,
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            max_wait: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.interval + Duration::from_millis(extra_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceOutcome {
    pub waited: Duration,
    pub polls: u32,
    /// Snapshot taken right after convergence was observed.
    pub snapshot: DatabaseSnapshot,
}

/// `01:02:03` for an elapsed duration.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub struct IndexConvergenceWaiter {
    recorder: Arc<TelemetryRecorder>,
}

impl IndexConvergenceWaiter {
    pub fn new(recorder: Arc<TelemetryRecorder>) -> Self {
        Self { recorder }
    }

    /// Poll until no enabled index is stale.
    ///
    /// Every tick force-refreshes the snapshot. Once converged, one more
    /// forced refresh captures the final state for reporting.
    pub async fn wait_for_convergence(
        &self,
        policy: PollPolicy,
    ) -> Result<ConvergenceOutcome, ConvergenceError> {
        let refresher = self.recorder.refresher();
        let started = Instant::now();
        let mut state = ConvergenceState::Waiting;
        let mut polls = 0u32;

        while state == ConvergenceState::Waiting {
            let snapshot = refresher.refresh(true).await?;
            polls += 1;

            if snapshot.is_converged() {
                state = ConvergenceState::Converged;
                continue;
            }

            let waited = started.elapsed();
            if let Some(max_wait) = policy.max_wait {
                if waited >= max_wait {
                    tracing::warn!(
                        waited_secs = waited.as_secs(),
                        stale = ?snapshot.stale_index_names,
                        "Gave up waiting for indexes"
                    );
                    return Err(ConvergenceError::TimedOut {
                        waited_secs: waited.as_secs(),
                        stale: snapshot.stale_index_names,
                    });
                }
            }

            self.recorder
                .report_status(format!(
                    "Waited {} for non-stale indexes.",
                    format_elapsed(waited)
                ))
                .await;
            tokio::time::sleep(policy.next_delay()).await;
        }

        let snapshot = refresher.refresh(true).await?;
        let waited = started.elapsed();
        tracing::info!(
            waited_ms = waited.as_millis() as u64,
            polls,
            indexes = snapshot.index_count,
            "Indexes are not stale"
        );
        Ok(ConvergenceOutcome {
            waited,
            polls,
            snapshot,
        })
    }
}
