//! Webhook signature and freshness verification.
//!
//! Signatures are hex-encoded HMAC-SHA256 over `"{timestamp}.{raw_body}"`,
//! where `timestamp` is the header text exactly as sent (trimmed).
//! Each provider has a secret set so secrets can be rotated without
//! downtime: a key id selects a named secret, otherwise the current secret
//! is tried first and then each previous secret in order.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;

use super::webhook_errors::WebhookError;

/// Default tolerance between the signed timestamp and the receiver's clock.
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// The secrets a single provider may sign with.
#[derive(Default)]
pub struct SecretSet {
    current: Option<SecretString>,
    previous: Vec<SecretString>,
    keys: HashMap<String, SecretString>,
}

impl SecretSet {
    /// A set holding exactly one current secret.
    pub fn single(secret: impl Into<String>) -> Self {
        Self {
            current: Some(SecretString::new(secret.into())),
            ..Self::default()
        }
    }

    /// A rotating set: `current`, then `previous` in order, plus named keys.
    pub fn rotating(
        current: Option<String>,
        previous: Vec<String>,
        keys: HashMap<String, String>,
    ) -> Self {
        Self {
            current: current.map(SecretString::new),
            previous: previous.into_iter().map(SecretString::new).collect(),
            keys: keys
                .into_iter()
                .map(|(id, secret)| (id, SecretString::new(secret)))
                .collect(),
        }
    }

    /// Returns true if no secret at all is configured.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.previous.is_empty() && self.keys.is_empty()
    }

    /// Secrets to try, in order, with duplicates removed.
    ///
    /// A key id pins verification to that named secret; an unknown key id
    /// yields no candidates.
    fn candidates(&self, key_id: Option<&str>) -> Vec<&SecretString> {
        let ordered: Vec<&SecretString> = match key_id {
            Some(id) => self.keys.get(id).into_iter().collect(),
            None => self.current.iter().chain(self.previous.iter()).collect(),
        };

        let mut unique: Vec<&SecretString> = Vec::with_capacity(ordered.len());
        for secret in ordered {
            if !unique
                .iter()
                .any(|seen| seen.expose_secret() == secret.expose_secret())
            {
                unique.push(secret);
            }
        }
        unique
    }
}

impl std::fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSet")
            .field("current", &self.current.is_some())
            .field("previous", &self.previous.len())
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Signature material captured from the inbound request headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookSignature<'a> {
    /// Unix seconds the provider signed at.
    pub timestamp: i64,
    /// Timestamp header text the MAC covers.
    pub timestamp_text: &'a str,
    /// Hex-encoded HMAC-SHA256.
    pub signature: &'a str,
    /// Optional name of the secret used to sign.
    pub key_id: Option<&'a str>,
}

/// Verifies authenticity and freshness of webhook envelopes.
#[derive(Debug)]
pub struct SignatureVerifier {
    providers: HashMap<String, SecretSet>,
    max_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn new(max_skew_secs: i64) -> Self {
        Self {
            providers: HashMap::new(),
            max_skew_secs,
        }
    }

    /// Registers (or replaces) a provider's secret set.
    pub fn with_provider(mut self, provider: impl Into<String>, secrets: SecretSet) -> Self {
        self.providers.insert(provider.into(), secrets);
        self
    }

    /// Returns true if a non-empty secret set exists for `provider`.
    pub fn knows_provider(&self, provider: &str) -> bool {
        self.providers
            .get(provider)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    /// Verifies a raw body against its signature headers.
    ///
    /// # Errors
    ///
    /// - `UnknownProvider` - no secrets configured for `provider`
    /// - `StaleTimestamp` - `|now - timestamp| > max_skew`, whatever the signature
    /// - `InvalidSignature` - no candidate secret reproduces the signature
    pub fn verify(
        &self,
        provider: &str,
        raw_body: &[u8],
        signature: &WebhookSignature<'_>,
        now: Timestamp,
    ) -> Result<(), WebhookError> {
        let secrets = self
            .providers
            .get(provider)
            .filter(|set| !set.is_empty())
            .ok_or_else(|| WebhookError::UnknownProvider(provider.to_string()))?;

        let skew = now
            .as_unix_secs()
            .checked_sub(signature.timestamp)
            .and_then(i64::checked_abs)
            .ok_or(WebhookError::StaleTimestamp)?;
        if skew > self.max_skew_secs {
            return Err(WebhookError::StaleTimestamp);
        }

        let provided =
            hex::decode(signature.signature.trim()).map_err(|_| WebhookError::InvalidSignature)?;

        let matched = secrets.candidates(signature.key_id).into_iter().any(|secret| {
            compute_signature(secret.expose_secret(), signature.timestamp_text, raw_body)
                .map(|expected| constant_time_compare(&expected, &provided))
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }
}

fn compute_signature(secret: &str, timestamp_text: &str, body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp_text.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Produces the hex signature a provider would send for `body`.
///
/// Used by senders, fixtures and integration tests.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
    compute_signature(secret, &timestamp.to_string(), body)
        .map(hex::encode)
        .ok_or(WebhookError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"event_id":"evt_1","event_type":"payment.succeeded","payload_json":{}}"#;
    const NOW: i64 = 1_771_934_400;
    const NOW_TEXT: &str = "1771934400";

    fn now() -> Timestamp {
        Timestamp::from_unix_secs("now", NOW).unwrap()
    }

    fn verifier(set: SecretSet) -> SignatureVerifier {
        SignatureVerifier::new(DEFAULT_MAX_SKEW_SECS).with_provider("stripe", set)
    }

    fn header(signature: &str) -> WebhookSignature<'_> {
        WebhookSignature {
            timestamp: NOW,
            timestamp_text: NOW_TEXT,
            signature,
            key_id: None,
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Signature Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn accepts_signature_from_current_secret() {
        let v = verifier(SecretSet::single("whsec_current"));
        let sig = sign_payload("whsec_current", NOW, BODY).unwrap();

        assert_eq!(v.verify("stripe", BODY, &header(&sig), now()), Ok(()));
    }

    #[test]
    fn accepts_uppercase_hex() {
        let v = verifier(SecretSet::single("whsec_current"));
        let sig = sign_payload("whsec_current", NOW, BODY).unwrap().to_uppercase();

        assert_eq!(v.verify("stripe", BODY, &header(&sig), now()), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let v = verifier(SecretSet::single("whsec_current"));
        let sig = sign_payload("whsec_current", NOW, BODY).unwrap();

        let result = v.verify("stripe", b"{\"event_id\":\"evt_2\"}", &header(&sig), now());
        assert_eq!(result, Err(WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_signature_over_different_timestamp() {
        let v = verifier(SecretSet::single("whsec_current"));
        let sig = sign_payload("whsec_current", NOW - 1, BODY).unwrap();

        let result = v.verify("stripe", BODY, &header(&sig), now());
        assert_eq!(result, Err(WebhookError::InvalidSignature));
    }

    #[test]
    fn rejects_non_hex_signature() {
        let v = verifier(SecretSet::single("whsec_current"));
        let result = v.verify("stripe", BODY, &header("zz-not-hex"), now());
        assert_eq!(result, Err(WebhookError::InvalidSignature));
    }

    // ══════════════════════════════════════════════════════════════
    // Rotation Tests
    // ══════════════════════════════════════════════════════════════

    fn rotating() -> SecretSet {
        SecretSet::rotating(
            Some("whsec_new".to_string()),
            vec!["whsec_old".to_string(), "whsec_older".to_string()],
            HashMap::from([("k2".to_string(), "whsec_k2".to_string())]),
        )
    }

    #[test]
    fn accepts_signature_from_any_previous_secret() {
        let v = verifier(rotating());
        for secret in ["whsec_new", "whsec_old", "whsec_older"] {
            let sig = sign_payload(secret, NOW, BODY).unwrap();
            assert_eq!(v.verify("stripe", BODY, &header(&sig), now()), Ok(()), "{}", secret);
        }
    }

    #[test]
    fn rejects_secret_outside_the_set() {
        let v = verifier(rotating());
        let sig = sign_payload("whsec_retired", NOW, BODY).unwrap();

        let result = v.verify("stripe", BODY, &header(&sig), now());
        assert_eq!(result, Err(WebhookError::InvalidSignature));
    }

    #[test]
    fn key_id_selects_named_secret() {
        let v = verifier(rotating());
        let sig = sign_payload("whsec_k2", NOW, BODY).unwrap();
        let with_key = WebhookSignature {
            key_id: Some("k2"),
            ..header(&sig)
        };

        assert_eq!(v.verify("stripe", BODY, &with_key, now()), Ok(()));
        assert_eq!(
            v.verify("stripe", BODY, &header(&sig), now()),
            Err(WebhookError::InvalidSignature),
            "named keys are not part of the rotation chain"
        );
    }

    #[test]
    fn key_id_pins_verification_to_that_secret() {
        let v = verifier(rotating());
        let sig = sign_payload("whsec_new", NOW, BODY).unwrap();
        let wrong_key = WebhookSignature {
            key_id: Some("k2"),
            ..header(&sig)
        };
        let unknown_key = WebhookSignature {
            key_id: Some("k9"),
            ..header(&sig)
        };

        assert_eq!(
            v.verify("stripe", BODY, &wrong_key, now()),
            Err(WebhookError::InvalidSignature)
        );
        assert_eq!(
            v.verify("stripe", BODY, &unknown_key, now()),
            Err(WebhookError::InvalidSignature)
        );
    }

    #[test]
    fn candidates_are_deduplicated_in_order() {
        let set = SecretSet::rotating(
            Some("a".to_string()),
            vec!["b".to_string(), "a".to_string(), "c".to_string()],
            HashMap::new(),
        );
        let exposed: Vec<&str> = set
            .candidates(None)
            .into_iter()
            .map(|s| s.expose_secret().as_str())
            .collect();
        assert_eq!(exposed, vec!["a", "b", "c"]);
    }

    // ══════════════════════════════════════════════════════════════
    // Freshness Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn accepts_timestamp_at_skew_boundary() {
        let v = verifier(SecretSet::single("s"));
        for ts in [NOW - DEFAULT_MAX_SKEW_SECS, NOW + DEFAULT_MAX_SKEW_SECS] {
            let sig = sign_payload("s", ts, BODY).unwrap();
            let text = ts.to_string();
            let h = WebhookSignature {
                timestamp: ts,
                timestamp_text: &text,
                signature: &sig,
                key_id: None,
            };
            assert_eq!(v.verify("stripe", BODY, &h, now()), Ok(()));
        }
    }

    #[test]
    fn stale_timestamp_wins_even_with_valid_signature() {
        let v = verifier(SecretSet::single("s"));
        for ts in [NOW - DEFAULT_MAX_SKEW_SECS - 1, NOW + DEFAULT_MAX_SKEW_SECS + 1] {
            let sig = sign_payload("s", ts, BODY).unwrap();
            let text = ts.to_string();
            let h = WebhookSignature {
                timestamp: ts,
                timestamp_text: &text,
                signature: &sig,
                key_id: None,
            };
            assert_eq!(v.verify("stripe", BODY, &h, now()), Err(WebhookError::StaleTimestamp));
        }
    }

    #[test]
    fn stale_timestamp_reported_for_bad_signature_too() {
        let v = verifier(SecretSet::single("s"));
        let h = WebhookSignature {
            timestamp: NOW - 10_000,
            timestamp_text: "1771924400",
            signature: "00",
            key_id: None,
        };
        assert_eq!(v.verify("stripe", BODY, &h, now()), Err(WebhookError::StaleTimestamp));
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflow() {
        let v = verifier(SecretSet::single("s"));
        for (ts, text) in [
            (i64::MIN, "-9223372036854775808"),
            (i64::MAX, "9223372036854775807"),
            (i64::MIN + 1, "-9223372036854775807"),
        ] {
            let h = WebhookSignature {
                timestamp: ts,
                timestamp_text: text,
                signature: "00",
                key_id: None,
            };
            assert_eq!(
                v.verify("stripe", BODY, &h, now()),
                Err(WebhookError::StaleTimestamp),
                "{}",
                text
            );
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Signed Text Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn signature_covers_timestamp_text_as_sent() {
        let v = verifier(SecretSet::single("s"));
        for text in ["+1771934400", "01771934400"] {
            let sig = hex::encode(compute_signature("s", text, BODY).unwrap());
            let h = WebhookSignature {
                timestamp: NOW,
                timestamp_text: text,
                signature: &sig,
                key_id: None,
            };
            assert_eq!(v.verify("stripe", BODY, &h, now()), Ok(()), "{}", text);
        }
    }

    #[test]
    fn signature_over_canonical_text_fails_for_reformatted_header() {
        let v = verifier(SecretSet::single("s"));
        let sig = sign_payload("s", NOW, BODY).unwrap();
        let h = WebhookSignature {
            timestamp: NOW,
            timestamp_text: "+1771934400",
            signature: &sig,
            key_id: None,
        };
        assert_eq!(v.verify("stripe", BODY, &h, now()), Err(WebhookError::InvalidSignature));
    }

    // ══════════════════════════════════════════════════════════════
    // Provider Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn unknown_provider_is_rejected() {
        let v = verifier(SecretSet::single("s"));
        let sig = sign_payload("s", NOW, BODY).unwrap();

        assert_eq!(
            v.verify("paypal", BODY, &header(&sig), now()),
            Err(WebhookError::UnknownProvider("paypal".to_string()))
        );
    }

    #[test]
    fn empty_secret_set_counts_as_unknown() {
        let v = verifier(SecretSet::default());
        assert!(!v.knows_provider("stripe"));
        assert!(matches!(
            v.verify("stripe", BODY, &header("00"), now()),
            Err(WebhookError::UnknownProvider(_))
        ));
    }

    #[test]
    fn debug_output_does_not_leak_secrets() {
        let rendered = format!("{:?}", rotating());
        assert!(!rendered.contains("whsec_"));
    }
}
