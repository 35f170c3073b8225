//! IngestionCoordinator - records inbound billing events and applies them once.
//!
//! # Protocol
//!
//! 1. Insert a `received` row for `(provider, event_id)` inside a transaction.
//! 2. On a key conflict, read the committed row instead of dispatching:
//!    different signature material is rejected, identical material returns
//!    the stored outcome.
//! 3. Otherwise dispatch to the handler, then commit the event row and any
//!    subscription change together.
//!
//! If the store fails after the insert, the transaction is abandoned and the
//! failure is recorded on the row in a fresh transaction, so no delivery is
//! lost without a `failed` record.
//!
//! The retry scheduler and manual reprocessing re-enter through
//! `redispatch`, which repeats step 3 on the existing row.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::billing::{
    handle, route, BillingError, EventType, HandlerFailure, Outcome, RetryPolicy, Transition,
    WebhookEvent,
};
use crate::domain::foundation::{DomainError, EventKey, Timestamp};
use crate::ports::{Clock, InboxStore, InboxTransaction, InsertResult};

/// A verified webhook delivery.
#[derive(Debug, Clone)]
pub struct IngestWebhookCommand {
    pub key: EventKey,
    pub event_type: String,
    pub payload: Value,
    pub signature_timestamp: i64,
    pub signature: String,
}

/// What the coordinator did with a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub outcome: Outcome,
    /// Why the event failed, was ignored, or was rejected.
    pub reason: Option<String>,
    /// True when the response reflects a previously stored outcome.
    pub replayed: bool,
    /// The stored row as of this call.
    pub event: WebhookEvent,
}

impl IngestReport {
    fn from_event(event: WebhookEvent, replayed: bool) -> Self {
        Self {
            outcome: Outcome::from_status(event.status),
            reason: event.error_message.clone(),
            replayed,
            event,
        }
    }
}

/// Which rows `redispatch` may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryGate {
    /// Only failed rows whose `next_retry_at` has passed and that are not
    /// flagged for attention.
    Due,
    /// Any row that has not reached processed or ignored, including rows
    /// flagged for attention.
    Manual,
}

/// Result of re-entering dispatch for an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum Redispatch {
    Dispatched(IngestReport),
    /// The row exists but the gate did not admit it.
    NotEligible(WebhookEvent),
    NotFound,
}

enum DispatchOutcome {
    Processed,
    Ignored(String),
    Failed(HandlerFailure),
}

pub struct IngestionCoordinator {
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
}

impl IngestionCoordinator {
    pub fn new(store: Arc<dyn InboxStore>, clock: Arc<dyn Clock>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            retry_policy,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Records and applies a verified delivery.
    ///
    /// Returns `Err` only when the store is unreachable before the event
    /// could be recorded at all.
    pub async fn ingest(&self, cmd: IngestWebhookCommand) -> Result<IngestReport, BillingError> {
        let now = self.clock.now();
        let event = WebhookEvent::received(
            cmd.key.clone(),
            cmd.event_type,
            cmd.payload,
            cmd.signature_timestamp,
            &cmd.signature,
            now,
        );

        let mut tx = self.store.begin().await?;
        if tx.insert_event(&event).await? == InsertResult::AlreadyExists {
            let existing = tx.find_event(&cmd.key).await?.ok_or_else(|| {
                BillingError::infrastructure(format!(
                    "Webhook event {} conflicted on insert but could not be read",
                    cmd.key
                ))
            })?;
            tx.rollback().await?;
            return Ok(self.resolve_duplicate(existing, cmd.signature_timestamp, &cmd.signature));
        }

        let template = event.clone();
        match self.dispatch_and_commit(tx, event, now).await {
            Ok(recorded) => {
                let report = IngestReport::from_event(recorded, false);
                log_report(&report);
                Ok(report)
            }
            Err(cause) => match self.record_failed_insert(template, cause, now).await {
                Ok(report) => Ok(report),
                Err(e) => {
                    error!(
                        provider = %cmd.key.provider,
                        event_id = %cmd.key.event_id,
                        error = %e,
                        "Failed to record webhook failure"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Re-runs dispatch on an existing row.
    pub async fn redispatch(&self, key: &EventKey, gate: RetryGate) -> Result<Redispatch, BillingError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let event = match tx.lock_event(key).await? {
            Some(event) => event,
            None => {
                tx.rollback().await?;
                return Ok(Redispatch::NotFound);
            }
        };

        let eligible = match gate {
            RetryGate::Due => event.is_due_for_retry(now),
            RetryGate::Manual => !event.is_settled(),
        };
        if !eligible {
            tx.rollback().await?;
            return Ok(Redispatch::NotEligible(event));
        }

        match self.dispatch_and_commit(tx, event, now).await {
            Ok(recorded) => {
                let report = IngestReport::from_event(recorded, false);
                log_report(&report);
                Ok(Redispatch::Dispatched(report))
            }
            Err(cause) => match self.record_failed_retry(key, cause, now).await {
                Ok(report) => Ok(Redispatch::Dispatched(report)),
                Err(e) => {
                    error!(
                        provider = %key.provider,
                        event_id = %key.event_id,
                        error = %e,
                        "Failed to record webhook retry failure"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Manual reprocess of one event, bypassing the retry schedule.
    ///
    /// Rows flagged for attention are eligible. A row that already reached
    /// processed or ignored is not dispatched again; its stored outcome is
    /// returned instead.
    pub async fn reprocess(&self, key: &EventKey) -> Result<IngestReport, BillingError> {
        match self.redispatch(key, RetryGate::Manual).await? {
            Redispatch::Dispatched(report) => Ok(report),
            Redispatch::NotEligible(event) => Ok(IngestReport::from_event(event, true)),
            Redispatch::NotFound => Err(BillingError::event_not_found(key.to_string())),
        }
    }

    fn resolve_duplicate(&self, existing: WebhookEvent, signature_timestamp: i64, signature: &str) -> IngestReport {
        match existing.check_replay(signature_timestamp, signature) {
            Err(mismatch) => {
                warn!(
                    provider = %existing.provider,
                    event_id = %existing.event_id,
                    reason = %mismatch,
                    "Rejected duplicate delivery with different signature material"
                );
                IngestReport {
                    outcome: Outcome::DuplicateRejected,
                    reason: Some(mismatch.to_string()),
                    replayed: true,
                    event: existing,
                }
            }
            Ok(()) => {
                let report = IngestReport::from_event(existing, true);
                info!(
                    provider = %report.event.provider,
                    event_id = %report.event.event_id,
                    outcome = %report.outcome,
                    "Duplicate delivery, returning stored outcome"
                );
                report
            }
        }
    }

    async fn dispatch_and_commit(
        &self,
        mut tx: Box<dyn InboxTransaction>,
        mut event: WebhookEvent,
        now: Timestamp,
    ) -> Result<WebhookEvent, DomainError> {
        match dispatch(tx.as_mut(), &event, now).await? {
            DispatchOutcome::Processed => event.record_processed(now),
            DispatchOutcome::Ignored(reason) => event.record_ignored(Some(reason), now),
            DispatchOutcome::Failed(failure) => {
                event.record_failure(failure.to_string(), &self.retry_policy, now)
            }
        }
        tx.update_event(&event).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Records a failure for a delivery whose dispatch transaction was lost.
    async fn record_failed_insert(
        &self,
        template: WebhookEvent,
        cause: DomainError,
        now: Timestamp,
    ) -> Result<IngestReport, BillingError> {
        let failure = HandlerFailure::from(cause);
        warn!(
            provider = %template.provider,
            event_id = %template.event_id,
            error = %failure,
            "Dispatch aborted by store failure, recording event as failed"
        );

        let key = template.key();
        let mut event = template;
        event.record_failure(failure.to_string(), &self.retry_policy, now);

        let mut tx = self.store.begin().await?;
        if tx.insert_event(&event).await? == InsertResult::AlreadyExists {
            // A concurrent delivery of the same event committed in between.
            let existing = tx.find_event(&key).await?.ok_or_else(|| {
                BillingError::infrastructure(format!("Webhook event {} vanished during recording", key))
            })?;
            tx.rollback().await?;
            return Ok(IngestReport::from_event(existing, true));
        }
        tx.commit().await?;

        let report = IngestReport::from_event(event, false);
        log_report(&report);
        Ok(report)
    }

    /// Records a failure for an existing row whose redispatch was lost.
    async fn record_failed_retry(
        &self,
        key: &EventKey,
        cause: DomainError,
        now: Timestamp,
    ) -> Result<IngestReport, BillingError> {
        let failure = HandlerFailure::from(cause);
        warn!(
            provider = %key.provider,
            event_id = %key.event_id,
            error = %failure,
            "Redispatch aborted by store failure, recording attempt as failed"
        );

        let mut tx = self.store.begin().await?;
        let mut event = tx
            .lock_event(key)
            .await?
            .ok_or_else(|| BillingError::event_not_found(key.to_string()))?;
        if event.is_settled() {
            tx.rollback().await?;
            return Ok(IngestReport::from_event(event, true));
        }
        event.record_failure(failure.to_string(), &self.retry_policy, now);
        tx.update_event(&event).await?;
        tx.commit().await?;

        let report = IngestReport::from_event(event, false);
        log_report(&report);
        Ok(report)
    }
}

/// Runs the registered handler for `event` inside `tx`.
///
/// Domain failures come back as `DispatchOutcome::Failed`; `Err` means the
/// store itself failed and the transaction must be abandoned.
async fn dispatch(
    tx: &mut dyn InboxTransaction,
    event: &WebhookEvent,
    now: Timestamp,
) -> Result<DispatchOutcome, DomainError> {
    let event_type = EventType::parse(&event.event_type);
    let input = match route(&event.provider, &event_type, &event.payload) {
        Ok(Some(input)) => input,
        Ok(None) => {
            return Ok(DispatchOutcome::Ignored(format!(
                "no handler for event type {}",
                event.event_type
            )))
        }
        Err(failure) => return Ok(DispatchOutcome::Failed(failure)),
    };

    let snapshot = tx.lock_subscription(&input.subscription).await?;
    match handle(snapshot.as_ref(), &input, now) {
        Ok(Transition::Applied(next)) => {
            tx.update_subscription(&next).await?;
            Ok(DispatchOutcome::Processed)
        }
        Ok(Transition::Ignored(reason)) => Ok(DispatchOutcome::Ignored(reason.to_string())),
        Err(failure) => Ok(DispatchOutcome::Failed(failure)),
    }
}

fn log_report(report: &IngestReport) {
    let event = &report.event;
    match report.outcome {
        Outcome::Processed | Outcome::Ignored => info!(
            provider = %event.provider,
            event_id = %event.event_id,
            event_type = %event.event_type,
            outcome = %report.outcome,
            attempt_count = event.attempt_count,
            "Webhook event recorded"
        ),
        Outcome::Failed | Outcome::DuplicateRejected => warn!(
            provider = %event.provider,
            event_id = %event.event_id,
            event_type = %event.event_type,
            outcome = %report.outcome,
            attempt_count = event.attempt_count,
            needs_attention = event.needs_attention,
            reason = report.reason.as_deref().unwrap_or(""),
            "Webhook event failed"
        ),
    }
}
