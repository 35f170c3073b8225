//! Inbox record of a received webhook event.
//!
//! One row per `(provider, event_id)`, never deleted. The row is the source
//! of truth for whether an event was seen and what happened to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{EventKey, Timestamp, ValidationError, WebhookEventId};

use super::RetryPolicy;

/// Processing status of an inbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Inserted, not yet dispatched.
    Received,
    /// Handler applied a subscription change.
    Processed,
    /// No handler or no applicable transition.
    Ignored,
    /// Handler failed; see `needs_attention` and `next_retry_at`.
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Received => "received",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Ignored => "ignored",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(ProcessingStatus::Received),
            "processed" => Ok(ProcessingStatus::Processed),
            "ignored" => Ok(ProcessingStatus::Ignored),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "processing_status",
                format!("unknown processing status '{}'", other),
            )),
        }
    }
}

/// Which captured signature field disagreed on a duplicate delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMismatch {
    Timestamp,
    Signature,
}

impl fmt::Display for ReplayMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayMismatch::Timestamp => write!(f, "replay timestamp mismatch"),
            ReplayMismatch::Signature => write!(f, "replay signature mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: ProcessingStatus,
    pub attempt_count: u32,
    pub next_retry_at: Option<Timestamp>,
    pub needs_attention: bool,
    pub signature_timestamp: i64,
    pub signature: String,
    pub error_message: Option<String>,
    pub received_at: Timestamp,
    pub processed_at: Option<Timestamp>,
}

impl WebhookEvent {
    /// A freshly received row, before any dispatch attempt.
    ///
    /// The signature is stored lowercased so that a retry sending the same
    /// bytes in another hex case is still an identical delivery.
    pub fn received(
        key: EventKey,
        event_type: impl Into<String>,
        payload: Value,
        signature_timestamp: i64,
        signature: &str,
        now: Timestamp,
    ) -> Self {
        Self {
            id: WebhookEventId::new(),
            provider: key.provider,
            event_id: key.event_id,
            event_type: event_type.into(),
            payload,
            status: ProcessingStatus::Received,
            attempt_count: 0,
            next_retry_at: None,
            needs_attention: false,
            signature_timestamp,
            signature: normalize_signature(signature),
            error_message: None,
            received_at: now,
            processed_at: None,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            provider: self.provider.clone(),
            event_id: self.event_id.clone(),
        }
    }

    /// Compares a duplicate delivery's signature fields with the stored ones.
    pub fn check_replay(&self, signature_timestamp: i64, signature: &str) -> Result<(), ReplayMismatch> {
        if self.signature_timestamp != signature_timestamp {
            return Err(ReplayMismatch::Timestamp);
        }
        if self.signature != normalize_signature(signature) {
            return Err(ReplayMismatch::Signature);
        }
        Ok(())
    }

    /// Records a successful dispatch that changed a subscription.
    pub fn record_processed(&mut self, now: Timestamp) {
        self.finish(ProcessingStatus::Processed, None, now);
    }

    /// Records a dispatch that had nothing to apply.
    pub fn record_ignored(&mut self, reason: Option<String>, now: Timestamp) {
        self.finish(ProcessingStatus::Ignored, reason, now);
    }

    fn finish(&mut self, status: ProcessingStatus, message: Option<String>, now: Timestamp) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.status = status;
        self.processed_at = Some(now);
        self.next_retry_at = None;
        self.needs_attention = false;
        self.error_message = message;
    }

    /// Records a failed dispatch and schedules the next retry.
    ///
    /// Once the attempt count passes the policy ceiling the row is flagged
    /// `needs_attention` and no further retry is scheduled.
    pub fn record_failure(&mut self, message: impl Into<String>, policy: &RetryPolicy, now: Timestamp) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.status = ProcessingStatus::Failed;
        self.error_message = Some(message.into());
        self.processed_at = None;
        if policy.exhausted(self.attempt_count) {
            self.needs_attention = true;
            self.next_retry_at = None;
        } else {
            self.needs_attention = false;
            self.next_retry_at = Some(now.plus_secs(policy.backoff_secs(self.attempt_count)));
        }
    }

    /// Returns true if the retry scheduler should pick this row up at `now`.
    pub fn is_due_for_retry(&self, now: Timestamp) -> bool {
        self.status == ProcessingStatus::Failed
            && !self.needs_attention
            && self
                .next_retry_at
                .map(|at| !at.is_after(&now))
                .unwrap_or(false)
    }

    /// Returns true if a dispatch already reached a final outcome.
    pub fn is_settled(&self) -> bool {
        matches!(self.status, ProcessingStatus::Processed | ProcessingStatus::Ignored)
    }
}

fn normalize_signature(signature: &str) -> String {
    signature.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs("test", secs).unwrap()
    }

    fn event() -> WebhookEvent {
        WebhookEvent::received(
            EventKey::new("stripe", "evt_1").unwrap(),
            "payment.succeeded",
            json!({ "provider_subscription_id": "sub_1" }),
            1_000,
            "ABCDEF",
            at(1_000),
        )
    }

    #[test]
    fn received_event_starts_clean() {
        let e = event();
        assert_eq!(e.status, ProcessingStatus::Received);
        assert_eq!(e.attempt_count, 0);
        assert_eq!(e.signature, "abcdef");
        assert!(!e.needs_attention);
        assert_eq!(e.key(), EventKey::new("stripe", "evt_1").unwrap());
    }

    #[test]
    fn check_replay_accepts_identical_signature_in_any_case() {
        assert_eq!(event().check_replay(1_000, "abcDEF"), Ok(()));
    }

    #[test]
    fn check_replay_reports_which_field_differs() {
        assert_eq!(event().check_replay(1_001, "abcdef"), Err(ReplayMismatch::Timestamp));
        assert_eq!(event().check_replay(1_000, "abcdee"), Err(ReplayMismatch::Signature));
    }

    #[test]
    fn failure_schedules_backoff_and_success_clears_it() {
        let policy = RetryPolicy::default();
        let mut e = event();

        e.record_failure("subscription not found", &policy, at(2_000));
        assert_eq!(e.status, ProcessingStatus::Failed);
        assert_eq!(e.attempt_count, 1);
        assert_eq!(e.next_retry_at, Some(at(2_300)));
        assert!(!e.is_due_for_retry(at(2_299)));
        assert!(e.is_due_for_retry(at(2_300)));

        e.record_processed(at(2_400));
        assert_eq!(e.status, ProcessingStatus::Processed);
        assert_eq!(e.attempt_count, 2);
        assert_eq!(e.next_retry_at, None);
        assert_eq!(e.error_message, None);
        assert_eq!(e.processed_at, Some(at(2_400)));
        assert!(e.is_settled());
    }

    #[test]
    fn fourth_failure_flags_for_attention() {
        let policy = RetryPolicy::default();
        let mut e = event();

        for _ in 0..3 {
            e.record_failure("boom", &policy, at(2_000));
            assert!(!e.needs_attention);
        }
        e.record_failure("boom", &policy, at(2_000));

        assert_eq!(e.attempt_count, 4);
        assert!(e.needs_attention);
        assert_eq!(e.next_retry_at, None);
        assert!(!e.is_due_for_retry(at(1_000_000)));
    }

    #[test]
    fn ignored_records_reason() {
        let mut e = event();
        e.record_ignored(Some("stale event ignored".to_string()), at(2_000));
        assert_eq!(e.status, ProcessingStatus::Ignored);
        assert_eq!(e.error_message.as_deref(), Some("stale event ignored"));
        assert_eq!(e.attempt_count, 1);
    }

    #[test]
    fn processing_status_parses_storage_names() {
        for status in [
            ProcessingStatus::Received,
            ProcessingStatus::Processed,
            ProcessingStatus::Ignored,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>(), Ok(status));
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }
}
