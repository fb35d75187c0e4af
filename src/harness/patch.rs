//! Server-side tag patching of matching documents.
//!
//! The dispatcher never fails the run: any error during submit or await is
//! captured into the run report and surfaced as [`PatchOutcome::Failed`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;

use super::error::PatchError;
use crate::records::{TagReference, User};
use crate::store::indexes::PAYMENT_SEARCH_INDEX;
use crate::store::query::TAG_IDS_FIELD;
use crate::store::{
    format_thousands, BulkOperationResult, DocumentStore, IndexQuery, OperationHandle,
    OperationId, PatchByQuery, PatchStatus, TagPatch,
};
use crate::telemetry::{CapturedError, TelemetryRecorder};

/// Payments with an amount strictly below `threshold`.
pub fn payments_below(threshold: f64) -> IndexQuery {
    IndexQuery::for_index(PAYMENT_SEARCH_INDEX, "Payments").where_less_than("Amount", threshold)
}

/// Recover the processed count from a `"Processed 1,234 items."` message.
///
/// The message is split on single spaces and the second token, with
/// thousands separators removed, must parse as an unsigned integer. Any
/// other shape is an error.
pub fn parse_processed_count(message: &str) -> Result<u64, PatchError> {
    message
        .split(' ')
        .nth(1)
        .map(|token| token.replace(',', ""))
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| PatchError::UnparseableResult(message.to_string()))
}

/// Processed count: the structured total when the store reports one,
/// otherwise parsed from the message.
fn processed_count(result: &BulkOperationResult) -> Result<u64, PatchError> {
    match result.total {
        Some(total) => Ok(total),
        None => parse_processed_count(&result.message),
    }
}

fn count_by_status(result: &BulkOperationResult) -> BTreeMap<PatchStatus, u64> {
    let mut counts = BTreeMap::new();
    for detail in &result.details {
        *counts.entry(detail.status).or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchSummary {
    pub operation: OperationId,
    pub processed: u64,
    pub status_counts: BTreeMap<PatchStatus, u64>,
    /// Time spent in the submit call alone.
    pub submit_elapsed: Duration,
    /// Submit through completion.
    pub total_elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Completed(PatchSummary),
    Failed(CapturedError),
}

impl PatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// A patch running in the background. Joining is up to the caller.
pub struct PatchTask {
    handle: JoinHandle<PatchOutcome>,
}

impl PatchTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<PatchOutcome, PatchError> {
        Ok(self.handle.await?)
    }
}

#[derive(Clone)]
pub struct PatchDispatcher {
    store: Arc<dyn DocumentStore>,
    recorder: Arc<TelemetryRecorder>,
    operation_poll: Duration,
}

impl PatchDispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, recorder: Arc<TelemetryRecorder>) -> Self {
        Self {
            store,
            recorder,
            operation_poll: crate::store::operation::DEFAULT_OPERATION_POLL,
        }
    }

    pub fn with_operation_poll(mut self, poll: Duration) -> Self {
        self.operation_poll = poll;
        self
    }

    /// Tag every document matching `predicate` that does not already carry
    /// `tag`, stamping `actor` into the audit block.
    pub async fn dispatch_tag_patch(
        &self,
        predicate: IndexQuery,
        tag: TagReference,
        actor: User,
    ) -> PatchOutcome {
        match self.run_patch(predicate, tag, actor).await {
            Ok(summary) => PatchOutcome::Completed(summary),
            Err(e) => {
                tracing::warn!(error = %e, "Patch failed, continuing run");
                PatchOutcome::Failed(self.recorder.report().capture_error(&e))
            }
        }
    }

    /// Run [`Self::dispatch_tag_patch`] on its own task.
    pub fn spawn_tag_patch(&self, predicate: IndexQuery, tag: TagReference, actor: User) -> PatchTask {
        let dispatcher = self.clone();
        PatchTask {
            handle: tokio::spawn(async move {
                dispatcher.dispatch_tag_patch(predicate, tag, actor).await
            }),
        }
    }

    async fn run_patch(
        &self,
        predicate: IndexQuery,
        tag: TagReference,
        actor: User,
    ) -> Result<PatchSummary, PatchError> {
        let query = predicate.and_not_contains_any(TAG_IDS_FIELD, vec![tag.id.clone()]);
        let operation = PatchByQuery {
            query,
            patch: TagPatch::new(tag, actor, Utc::now()),
            allow_stale: true,
            retrieve_details: true,
        };

        let report = self.recorder.report().clone();
        let now = Utc::now();
        report.update_timeline(|t| {
            t.patch_started = Some(now);
            t.patch_last_update = Some(now);
        });

        let started = Instant::now();
        let id = self.store.submit_patch(&operation).await?;
        let submit_elapsed = started.elapsed();
        tracing::info!(
            operation = %id,
            tag = %operation.patch.tag,
            submit_ms = submit_elapsed.as_millis() as u64,
            "Patch operation submitted"
        );

        let recorder = self.recorder.clone();
        let result = OperationHandle::new(self.store.clone(), id)
            .with_poll_interval(self.operation_poll)
            .wait_for_completion(|progress| {
                recorder.report().record_patch_progress(progress.processed);
                let sample = recorder.sample(format!(
                    "Tag Progress: {:.1}%   [{} Tagged of {}]",
                    progress.percent(),
                    format_thousands(progress.processed),
                    format_thousands(progress.total)
                ));
                tracing::info!(operation = %id, status = %sample.status, "Patch progress");
            })
            .await?;
        let total_elapsed = started.elapsed();

        let processed = processed_count(&result)?;
        report.record_patch_progress(processed);
        report.update_timeline(|t| t.patch_finished = Some(Utc::now()));

        let status_counts = count_by_status(&result);
        tracing::info!(
            operation = %id,
            processed,
            statuses = ?status_counts,
            submit_ms = submit_elapsed.as_millis() as u64,
            total_ms = total_elapsed.as_millis() as u64,
            "Patch operation complete"
        );

        Ok(PatchSummary {
            operation: id,
            processed,
            status_counts,
            submit_elapsed,
            total_elapsed,
        })
    }
}
