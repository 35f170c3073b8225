//! PostgreSQL implementation of InboxStore.
//!
//! `webhook_events` carries a unique constraint on `(provider, event_id)` and
//! `subscriptions` one on `(provider, provider_subscription_id)`. Inserts use
//! `ON CONFLICT DO NOTHING RETURNING id`: an empty result is the conflict
//! signal. Under read committed, a conflicting insert waits for the other
//! transaction to finish, so the follow-up read sees its committed row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::billing::{Subscription, SubscriptionStatus, WebhookEvent};
use crate::domain::foundation::{
    DomainError, ErrorCode, EventKey, SubscriptionId, SubscriptionKey, Timestamp, WebhookEventId,
};
use crate::ports::{InboxStore, InboxTransaction, InsertResult};

const EVENT_COLUMNS: &str = "id, provider, event_id, event_type, payload, status, attempt_count, \
     next_retry_at, needs_attention, signature_timestamp, signature, error_message, \
     received_at, processed_at";

const SUBSCRIPTION_COLUMNS: &str = "id, provider, provider_subscription_id, provider_customer_id, \
     status, cancel_at_period_end, past_due_since, canceled_at, expired_at, access_revoked, \
     current_period_end, created_at, updated_at";

/// PostgreSQL implementation of the InboxStore port.
#[derive(Clone)]
pub struct PostgresInboxStore {
    pool: PgPool,
}

impl PostgresInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a webhook event.
#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    provider: String,
    event_id: String,
    event_type: String,
    payload: Value,
    status: String,
    attempt_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    needs_attention: bool,
    signature_timestamp: i64,
    signature: String,
    error_message: Option<String>,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid event status: {}", e))
        })?;
        let attempt_count = u32::try_from(row.attempt_count).map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid attempt_count: {}", row.attempt_count),
            )
        })?;

        Ok(WebhookEvent {
            id: WebhookEventId::from_uuid(row.id),
            provider: row.provider,
            event_id: row.event_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            attempt_count,
            next_retry_at: row.next_retry_at.map(Timestamp::from_datetime),
            needs_attention: row.needs_attention,
            signature_timestamp: row.signature_timestamp,
            signature: row.signature,
            error_message: row.error_message,
            received_at: Timestamp::from_datetime(row.received_at),
            processed_at: row.processed_at.map(Timestamp::from_datetime),
        })
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    provider: String,
    provider_subscription_id: String,
    provider_customer_id: Option<String>,
    status: String,
    cancel_at_period_end: bool,
    past_due_since: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    access_revoked: bool,
    current_period_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|e| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid subscription status: {}", e),
            )
        })?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            provider: row.provider,
            provider_subscription_id: row.provider_subscription_id,
            provider_customer_id: row.provider_customer_id,
            status,
            cancel_at_period_end: row.cancel_at_period_end,
            past_due_since: row.past_due_since.map(Timestamp::from_datetime),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            expired_at: row.expired_at.map(Timestamp::from_datetime),
            access_revoked: row.access_revoked,
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventKeyRow {
    provider: String,
    event_id: String,
}

fn db_error(action: &str, e: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, e))
}

fn attempt_count_column(event: &WebhookEvent) -> i32 {
    i32::try_from(event.attempt_count).unwrap_or(i32::MAX)
}

fn opt_datetime(ts: Option<Timestamp>) -> Option<DateTime<Utc>> {
    ts.map(|t| *t.as_datetime())
}

#[async_trait]
impl InboxStore for PostgresInboxStore {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;
        Ok(Box::new(PostgresInboxTransaction { tx }))
    }

    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        let sql = format!(
            "SELECT {} FROM webhook_events WHERE provider = $1 AND event_id = $2",
            EVENT_COLUMNS
        );
        let row: Option<WebhookEventRow> = sqlx::query_as(&sql)
            .bind(&key.provider)
            .bind(&key.event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find webhook event", e))?;
        row.map(WebhookEvent::try_from).transpose()
    }

    async fn find_events_by_event_id(&self, event_id: &str) -> Result<Vec<WebhookEvent>, DomainError> {
        let sql = format!(
            "SELECT {} FROM webhook_events WHERE event_id = $1 ORDER BY provider",
            EVENT_COLUMNS
        );
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("find webhook events", e))?;
        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn list_events(&self, limit: u32) -> Result<Vec<WebhookEvent>, DomainError> {
        let sql = format!(
            "SELECT {} FROM webhook_events ORDER BY received_at DESC LIMIT $1",
            EVENT_COLUMNS
        );
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list webhook events", e))?;
        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn list_due_for_retry(&self, now: Timestamp, limit: u32) -> Result<Vec<EventKey>, DomainError> {
        let rows: Vec<EventKeyRow> = sqlx::query_as(
            r#"
            SELECT provider, event_id FROM webhook_events
            WHERE status = 'failed'
              AND needs_attention = FALSE
              AND next_retry_at <= $1
            ORDER BY next_retry_at
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list due webhook events", e))?;

        Ok(rows
            .into_iter()
            .map(|row| EventKey {
                provider: row.provider,
                event_id: row.event_id,
            })
            .collect())
    }

    async fn find_subscription(&self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE provider = $1 AND provider_subscription_id = $2",
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(&key.provider)
            .bind(&key.provider_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }
}

/// One database transaction. Dropping it without `commit` rolls back.
pub struct PostgresInboxTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresInboxTransaction {
    async fn select_event(&mut self, key: &EventKey, for_update: bool) -> Result<Option<WebhookEvent>, DomainError> {
        let sql = format!(
            "SELECT {} FROM webhook_events WHERE provider = $1 AND event_id = $2{}",
            EVENT_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row: Option<WebhookEventRow> = sqlx::query_as(&sql)
            .bind(&key.provider)
            .bind(&key.event_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("read webhook event", e))?;
        row.map(WebhookEvent::try_from).transpose()
    }
}

#[async_trait]
impl InboxTransaction for PostgresInboxTransaction {
    async fn insert_event(&mut self, event: &WebhookEvent) -> Result<InsertResult, DomainError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (
                id, provider, event_id, event_type, payload, status, attempt_count,
                next_retry_at, needs_attention, signature_timestamp, signature,
                error_message, received_at, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.provider)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(attempt_count_column(event))
        .bind(opt_datetime(event.next_retry_at))
        .bind(event.needs_attention)
        .bind(event.signature_timestamp)
        .bind(&event.signature)
        .bind(&event.error_message)
        .bind(event.received_at.as_datetime())
        .bind(opt_datetime(event.processed_at))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert webhook event", e))?;

        Ok(match inserted {
            Some(_) => InsertResult::Inserted,
            None => InsertResult::AlreadyExists,
        })
    }

    async fn find_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        self.select_event(key, false).await
    }

    async fn lock_event(&mut self, key: &EventKey) -> Result<Option<WebhookEvent>, DomainError> {
        self.select_event(key, true).await
    }

    async fn update_event(&mut self, event: &WebhookEvent) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                status = $3,
                attempt_count = $4,
                next_retry_at = $5,
                needs_attention = $6,
                error_message = $7,
                processed_at = $8
            WHERE provider = $1 AND event_id = $2
            "#,
        )
        .bind(&event.provider)
        .bind(&event.event_id)
        .bind(event.status.as_str())
        .bind(attempt_count_column(event))
        .bind(opt_datetime(event.next_retry_at))
        .bind(event.needs_attention)
        .bind(&event.error_message)
        .bind(opt_datetime(event.processed_at))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update webhook event", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::WebhookEventNotFound,
                format!("Webhook event not found: {}", event.key()),
            ));
        }
        Ok(())
    }

    async fn lock_subscription(&mut self, key: &SubscriptionKey) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions \
             WHERE provider = $1 AND provider_subscription_id = $2 FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(&key.provider)
            .bind(&key.provider_subscription_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("lock subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn lock_subscriptions_by_status(
        &mut self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = lock_by_status_sql();
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("lock subscriptions", e))?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn insert_subscription(&mut self, subscription: &Subscription) -> Result<InsertResult, DomainError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                id, provider, provider_subscription_id, provider_customer_id, status,
                cancel_at_period_end, past_due_since, canceled_at, expired_at,
                access_revoked, current_period_end, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (provider, provider_subscription_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(&subscription.provider)
        .bind(&subscription.provider_subscription_id)
        .bind(&subscription.provider_customer_id)
        .bind(subscription.status.as_str())
        .bind(subscription.cancel_at_period_end)
        .bind(opt_datetime(subscription.past_due_since))
        .bind(opt_datetime(subscription.canceled_at))
        .bind(opt_datetime(subscription.expired_at))
        .bind(subscription.access_revoked)
        .bind(opt_datetime(subscription.current_period_end))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("insert subscription", e))?;

        Ok(match inserted {
            Some(_) => InsertResult::Inserted,
            None => InsertResult::AlreadyExists,
        })
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> Result<(), DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                provider_customer_id = $3,
                status = $4,
                cancel_at_period_end = $5,
                past_due_since = $6,
                canceled_at = $7,
                expired_at = $8,
                access_revoked = $9,
                current_period_end = $10,
                updated_at = $11
            WHERE provider = $1 AND provider_subscription_id = $2
            "#,
        )
        .bind(&subscription.provider)
        .bind(&subscription.provider_subscription_id)
        .bind(&subscription.provider_customer_id)
        .bind(subscription.status.as_str())
        .bind(subscription.cancel_at_period_end)
        .bind(opt_datetime(subscription.past_due_since))
        .bind(opt_datetime(subscription.canceled_at))
        .bind(opt_datetime(subscription.expired_at))
        .bind(subscription.access_revoked)
        .bind(opt_datetime(subscription.current_period_end))
        .bind(subscription.updated_at.as_datetime())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription not found: {}", subscription.key()),
            ));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let PostgresInboxTransaction { tx } = *self;
        tx.commit().await.map_err(|e| db_error("commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        let PostgresInboxTransaction { tx } = *self;
        tx.rollback().await.map_err(|e| db_error("roll back transaction", e))
    }
}

/// Rows are locked in `(created_at, id)` order so concurrent job runs
/// acquire them in the same sequence.
fn lock_by_status_sql() -> String {
    format!(
        "SELECT {} FROM subscriptions WHERE status = $1 ORDER BY created_at, id FOR UPDATE",
        SUBSCRIPTION_COLUMNS
    )
}
