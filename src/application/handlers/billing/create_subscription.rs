//! CreateSubscriptionHandler - registers a subscription awaiting payment.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::domain::billing::{BillingError, Subscription};
use crate::domain::foundation::SubscriptionKey;
use crate::ports::{Clock, InboxStore, InsertResult};

/// Command to create a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub provider: String,
    /// Generated as `sub_<16 hex>` when absent.
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
}

pub struct CreateSubscriptionHandler {
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
}

impl CreateSubscriptionHandler {
    pub fn new(store: Arc<dyn InboxStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn handle(&self, cmd: CreateSubscriptionCommand) -> Result<Subscription, BillingError> {
        let id = cmd
            .provider_subscription_id
            .unwrap_or_else(generate_subscription_id);
        let key = SubscriptionKey::new(cmd.provider, id)?;
        let subscription = Subscription::pending(key.clone(), cmd.provider_customer_id, self.clock.now());

        let mut tx = self.store.begin().await?;
        if tx.insert_subscription(&subscription).await? == InsertResult::AlreadyExists {
            tx.rollback().await?;
            return Err(BillingError::subscription_exists(&key));
        }
        tx.commit().await?;

        info!(
            provider = %subscription.provider,
            subscription_id = %subscription.provider_subscription_id,
            "Subscription created"
        );
        Ok(subscription)
    }
}

fn generate_subscription_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("sub_{}", &hex[..16])
}
