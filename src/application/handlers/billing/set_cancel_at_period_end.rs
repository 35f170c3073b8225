//! SetCancelAtPeriodEndHandler - toggles the end-of-period cancellation flag.
//!
//! The flag only matters to the expiry job: an active subscription with the
//! flag set is canceled instead of expired when its period ends.

use std::sync::Arc;

use tracing::info;

use crate::domain::billing::{BillingError, Subscription};
use crate::domain::foundation::SubscriptionKey;
use crate::ports::{Clock, InboxStore};

#[derive(Debug, Clone)]
pub struct SetCancelAtPeriodEndCommand {
    pub key: SubscriptionKey,
    pub cancel_at_period_end: bool,
}

pub struct SetCancelAtPeriodEndHandler {
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
}

impl SetCancelAtPeriodEndHandler {
    pub fn new(store: Arc<dyn InboxStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn handle(&self, cmd: SetCancelAtPeriodEndCommand) -> Result<Subscription, BillingError> {
        let mut tx = self.store.begin().await?;
        let Some(mut subscription) = tx.lock_subscription(&cmd.key).await? else {
            tx.rollback().await?;
            return Err(BillingError::subscription_not_found(&cmd.key));
        };

        subscription.set_cancel_at_period_end(cmd.cancel_at_period_end, self.clock.now());
        tx.update_subscription(&subscription).await?;
        tx.commit().await?;

        info!(
            provider = %subscription.provider,
            subscription_id = %subscription.provider_subscription_id,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Cancel-at-period-end updated"
        );
        Ok(subscription)
    }
}
