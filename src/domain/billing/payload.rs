//! Payment event payload contract.

use serde::Deserialize;
use serde_json::Value;

use crate::domain::foundation::Timestamp;

use super::errors::HandlerFailure;

/// Period end as sent by providers: RFC 3339 text or Unix seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PeriodEnd {
    UnixSeconds(i64),
    Text(String),
}

impl PeriodEnd {
    pub fn to_timestamp(&self) -> Result<Timestamp, HandlerFailure> {
        let parsed = match self {
            PeriodEnd::UnixSeconds(secs) => Timestamp::from_unix_secs("current_period_end", *secs),
            PeriodEnd::Text(text) => Timestamp::parse_rfc3339("current_period_end", text),
        };
        parsed.map_err(|e| HandlerFailure::invalid_payload(e.to_string()))
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Body shared by `payment.succeeded` and `invoice.payment_failed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentPayload {
    pub provider_subscription_id: String,
    #[serde(default)]
    pub provider_customer_id: Option<String>,
    #[serde(default)]
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub current_period_end: Option<PeriodEnd>,
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub invoice_id: Option<String>,
}

impl PaymentPayload {
    /// Parses a stored payload object.
    pub fn from_value(payload: &Value) -> Result<Self, HandlerFailure> {
        if !payload.is_object() {
            return Err(HandlerFailure::invalid_payload("payload must be a JSON object"));
        }
        let parsed: PaymentPayload = serde_json::from_value(payload.clone())
            .map_err(|e| HandlerFailure::invalid_payload(e.to_string()))?;
        if parsed.provider_subscription_id.trim().is_empty() {
            return Err(HandlerFailure::invalid_payload(
                "provider_subscription_id cannot be empty",
            ));
        }
        Ok(parsed)
    }

    /// Parsed period end, if the payload carried one.
    pub fn period_end(&self) -> Result<Option<Timestamp>, HandlerFailure> {
        self.current_period_end
            .as_ref()
            .map(PeriodEnd::to_timestamp)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_payload_with_rfc3339_period_end() {
        let payload = PaymentPayload::from_value(&json!({
            "provider_subscription_id": "sub_456",
            "provider_customer_id": "cus_1",
            "amount": 4900,
            "currency": "EUR",
            "current_period_end": "2026-02-24T12:00:00Z",
            "payment_id": "pay_1",
            "invoice_id": "in_1"
        }))
        .unwrap();

        assert_eq!(payload.provider_subscription_id, "sub_456");
        assert_eq!(payload.amount, 4900);
        assert_eq!(payload.currency, "EUR");
        assert_eq!(
            payload.period_end().unwrap().map(|t| t.as_unix_secs()),
            Some(1_771_934_400)
        );
    }

    #[test]
    fn applies_defaults_for_optional_fields() {
        let payload = PaymentPayload::from_value(&json!({ "provider_subscription_id": "sub_1" })).unwrap();

        assert_eq!(payload.amount, 0);
        assert_eq!(payload.currency, "USD");
        assert_eq!(payload.period_end().unwrap(), None);
        assert_eq!(payload.provider_customer_id, None);
    }

    #[test]
    fn accepts_unix_seconds_period_end() {
        let payload = PaymentPayload::from_value(&json!({
            "provider_subscription_id": "sub_1",
            "current_period_end": 1_771_934_400
        }))
        .unwrap();

        assert_eq!(
            payload.period_end().unwrap().map(|t| t.as_unix_secs()),
            Some(1_771_934_400)
        );
    }

    #[test]
    fn rejects_missing_subscription_id() {
        let err = PaymentPayload::from_value(&json!({ "amount": 10 })).unwrap_err();
        assert!(matches!(err, HandlerFailure::InvalidPayload(ref m) if m.contains("provider_subscription_id")));
    }

    #[test]
    fn rejects_blank_subscription_id() {
        assert!(PaymentPayload::from_value(&json!({ "provider_subscription_id": "  " })).is_err());
    }

    #[test]
    fn rejects_non_object_payload() {
        assert!(PaymentPayload::from_value(&json!(["sub_1"])).is_err());
    }

    #[test]
    fn unparseable_period_end_is_an_invalid_payload() {
        let payload = PaymentPayload::from_value(&json!({
            "provider_subscription_id": "sub_1",
            "current_period_end": "end of month"
        }))
        .unwrap();

        assert!(matches!(payload.period_end(), Err(HandlerFailure::InvalidPayload(_))));
    }
}
