//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Surrogate identifier of a stored webhook event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookEventId(Uuid);

impl WebhookEventId {
    /// Creates a new random WebhookEventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a WebhookEventId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WebhookEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WebhookEventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Surrogate identifier of a stored subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random SubscriptionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a SubscriptionId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn non_empty(field: &str, value: impl Into<String>) -> Result<String, ValidationError> {
    let value = value.into();
    if value.trim().is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    Ok(value)
}

/// Natural key of a webhook event: `(provider, event_id)`.
///
/// The store enforces uniqueness on this pair; it is the only arbiter
/// of "have we seen this event" under concurrent delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub provider: String,
    pub event_id: String,
}

impl EventKey {
    pub fn new(
        provider: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            provider: non_empty("provider", provider)?,
            event_id: non_empty("event_id", event_id)?,
        })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.event_id)
    }
}

/// Natural key of a subscription: `(provider, provider_subscription_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub provider: String,
    pub provider_subscription_id: String,
}

impl SubscriptionKey {
    pub fn new(
        provider: impl Into<String>,
        provider_subscription_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            provider: non_empty("provider", provider)?,
            provider_subscription_id: non_empty(
                "provider_subscription_id",
                provider_subscription_id,
            )?,
        })
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.provider_subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_event_id_generates_unique_values() {
        assert_ne!(WebhookEventId::new(), WebhookEventId::new());
    }

    #[test]
    fn webhook_event_id_parses_from_string() {
        let id = WebhookEventId::new();
        let parsed: WebhookEventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn subscription_id_serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = SubscriptionId::from_uuid(uuid);
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{}\"", uuid));
    }

    #[test]
    fn event_key_rejects_blank_parts() {
        assert_eq!(
            EventKey::new(" ", "evt_1").unwrap_err(),
            ValidationError::empty_field("provider")
        );
        assert_eq!(
            EventKey::new("stripe", "").unwrap_err(),
            ValidationError::empty_field("event_id")
        );
    }

    #[test]
    fn event_key_displays_as_provider_colon_id() {
        let key = EventKey::new("stripe", "evt_1").unwrap();
        assert_eq!(key.to_string(), "stripe:evt_1");
    }

    #[test]
    fn subscription_key_rejects_blank_subscription_id() {
        assert_eq!(
            SubscriptionKey::new("stripe", "").unwrap_err(),
            ValidationError::empty_field("provider_subscription_id")
        );
    }
}
