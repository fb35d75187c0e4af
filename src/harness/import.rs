//! Parallel import of synthetic charge/payment pairs.
//!
//! Each round re-reads the store's document count, sizes a set of workers
//! for the remaining gap and waits for the *first* of them to finish before
//! re-evaluating. Workers from earlier rounds may still be writing when the
//! next round computes `remaining`, so the final count can overshoot the
//! target by up to one round's worth of in-flight batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinSet;

use super::error::ImportError;
use crate::records::RecordFactory;
use crate::store::{BulkInsert, DocumentStore, StoreError, DEFAULT_CHUNK_SIZE};
use crate::telemetry::{RunReport, TelemetryRecorder};

/// Worker sizing for one import round. All workers launched in a round use
/// the same plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    pub remaining: u64,
    pub threads: usize,
    /// Documents per worker (charges and payments together).
    pub batch: u64,
}

impl RoundPlan {
    /// Pairs per worker. An odd batch rounds up to a whole pair.
    pub fn pairs_per_worker(&self) -> u64 {
        self.batch.div_ceil(2)
    }
}

/// Size the next round, or `None` once `current` has reached `target`.
pub fn plan_round(
    target: u64,
    current: u64,
    max_threads: usize,
    per_thread_cap: u64,
) -> Option<RoundPlan> {
    if current >= target {
        return None;
    }
    let remaining = target - current;
    let cap = per_thread_cap.max(1);
    let threads_needed = remaining.div_ceil(cap);
    let threads = usize::try_from(threads_needed)
        .unwrap_or(usize::MAX)
        .min(max_threads)
        .max(1);
    let batch = (remaining / threads as u64).min(cap).max(1);
    Some(RoundPlan {
        remaining,
        threads,
        batch,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub plans: Vec<RoundPlan>,
    pub workers_launched: usize,
    pub documents_written: u64,
    pub final_count: u64,
    pub elapsed: Duration,
}

/// Drives bulk inserts until the store holds at least the target count.
pub struct ImportScheduler {
    store: Arc<dyn DocumentStore>,
    recorder: Arc<TelemetryRecorder>,
    seed: Option<u64>,
    chunk_size: usize,
}

impl ImportScheduler {
    pub fn new(store: Arc<dyn DocumentStore>, recorder: Arc<TelemetryRecorder>) -> Self {
        Self {
            store,
            recorder,
            seed: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Derive every worker's generator from `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn factory_for(&self, worker: usize) -> RecordFactory {
        match self.seed {
            Some(seed) => RecordFactory::seeded(seed ^ (worker as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            None => RecordFactory::from_entropy(),
        }
    }

    /// Insert until the refreshed document count reaches `target`.
    ///
    /// A failed worker is not retried: the error aborts the remaining
    /// workers and is returned.
    pub async fn run_import(
        &self,
        target: u64,
        max_threads: usize,
        per_thread_cap: u64,
    ) -> Result<ImportOutcome, ImportError> {
        let started = Instant::now();
        let report = self.recorder.report().clone();
        let refresher = self.recorder.refresher().clone();
        report.update_timeline(|t| {
            t.import_started.get_or_insert_with(Utc::now);
        });

        let mut workers: JoinSet<Result<u64, ImportError>> = JoinSet::new();
        let mut plans = Vec::new();
        let mut workers_launched = 0usize;
        let mut documents_written = 0u64;

        loop {
            let snapshot = refresher.refresh(true).await?;
            let Some(plan) = plan_round(target, snapshot.document_count, max_threads, per_thread_cap)
            else {
                break;
            };

            tracing::info!(
                round = plans.len() + 1,
                current = snapshot.document_count,
                target_count = target,
                remaining = plan.remaining,
                threads = plan.threads,
                batch = plan.batch,
                in_flight = workers.len(),
                "Starting import round"
            );

            self.recorder
                .report_status(format!(
                    "Importing {} docs/thread with {} threads ...",
                    plan.batch, plan.threads
                ))
                .await;

            for _ in 0..plan.threads {
                workers.spawn(insert_worker(
                    workers_launched,
                    self.store.clone(),
                    report.clone(),
                    plan.pairs_per_worker(),
                    self.chunk_size,
                    self.factory_for(workers_launched),
                ));
                workers_launched += 1;
            }
            plans.push(plan);

            // Advance on the first finished worker; the rest keep writing.
            if let Some(joined) = workers.join_next().await {
                documents_written += joined??;
            }

            report.update_timeline(|t| t.import_last_update = Some(Utc::now()));
        }

        while let Some(joined) = workers.join_next().await {
            documents_written += joined??;
        }

        let final_count = refresher.refresh(true).await?.document_count;
        report.update_timeline(|t| t.import_finished = Some(Utc::now()));

        let outcome = ImportOutcome {
            plans,
            workers_launched,
            documents_written,
            final_count,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            rounds = outcome.plans.len(),
            workers = outcome.workers_launched,
            written = outcome.documents_written,
            final_count = outcome.final_count,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Import complete"
        );
        Ok(outcome)
    }
}

/// Insert `pairs` charge/payment pairs through one bulk session.
async fn insert_worker(
    worker: usize,
    store: Arc<dyn DocumentStore>,
    report: Arc<RunReport>,
    pairs: u64,
    chunk_size: usize,
    mut factory: RecordFactory,
) -> Result<u64, ImportError> {
    let wrap = |source: StoreError| ImportError::Worker { worker, source };
    let mut session = BulkInsert::with_chunk_size(store.as_ref(), chunk_size);

    for _ in 0..pairs {
        let (charge, payment) = factory.generate_charge_payment();
        let flushed = session.store(&charge).await.map_err(wrap)?
            + session.store(&payment).await.map_err(wrap)?;
        if flushed > 0 {
            report.record_written(flushed as u64);
        }
    }

    let (last, total) = session.finish().await.map_err(wrap)?;
    if last > 0 {
        report.record_written(last as u64);
    }
    tracing::debug!(worker, written = total, "Import worker finished");
    Ok(total as u64)
}
