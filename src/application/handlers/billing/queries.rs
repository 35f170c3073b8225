//! Read access to webhook events and subscriptions for the admin surface.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Subscription, WebhookEvent};
use crate::domain::foundation::{EventKey, SubscriptionKey};
use crate::ports::InboxStore;

/// Upper bound for `list_webhook_events`.
pub const MAX_LIST_LIMIT: u32 = 500;

pub struct BillingQueries {
    store: Arc<dyn InboxStore>,
}

impl BillingQueries {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self { store }
    }

    pub async fn get_subscription(&self, key: &SubscriptionKey) -> Result<Subscription, BillingError> {
        self.store
            .find_subscription(key)
            .await?
            .ok_or_else(|| BillingError::subscription_not_found(key))
    }

    /// Most recent events first, at most `MAX_LIST_LIMIT`.
    pub async fn list_webhook_events(&self, limit: u32) -> Result<Vec<WebhookEvent>, BillingError> {
        Ok(self.store.list_events(limit.clamp(1, MAX_LIST_LIMIT)).await?)
    }

    /// Finds an event by id, optionally scoped to one provider.
    ///
    /// Without a provider the id must be unique across providers.
    pub async fn get_webhook_event(
        &self,
        event_id: &str,
        provider: Option<&str>,
    ) -> Result<WebhookEvent, BillingError> {
        if let Some(provider) = provider {
            let key = EventKey::new(provider, event_id)?;
            return self
                .store
                .find_event(&key)
                .await?
                .ok_or_else(|| BillingError::event_not_found(key.to_string()));
        }

        let mut matches = self.store.find_events_by_event_id(event_id).await?;
        match matches.len() {
            0 => Err(BillingError::event_not_found(event_id)),
            1 => Ok(matches.remove(0)),
            n => Err(BillingError::validation(
                "provider",
                format!("event id {} exists for {} providers; specify provider", event_id, n),
            )),
        }
    }
}
