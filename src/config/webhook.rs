//! Webhook receiver configuration

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::billing::{SecretSet, SignatureVerifier, DEFAULT_MAX_SKEW_SECS};

/// Signing secrets, freshness window and edge limits for inbound webhooks.
///
/// `secrets_json` maps each provider to either a bare secret or a rotating
/// set:
///
/// ```text
/// {"stripe": "whsec_a",
///  "adyen": {"current": "k2", "previous": ["k1"], "keys": {"2026-01": "k0"}}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Provider secret sets as a JSON object
    #[serde(default = "empty_secrets")]
    pub secrets_json: SecretString,

    /// Accepted distance between the signed timestamp and now, in seconds
    #[serde(default = "default_max_skew")]
    pub max_skew_secs: i64,

    /// Deliveries allowed per `(provider, client_ip)` per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Comma-separated client IPs; empty allows all
    #[serde(default)]
    pub ip_allowlist: String,

    /// Comma-separated proxy IPs whose `X-Forwarded-For` is honored; empty
    /// means the connection peer is always the client
    #[serde(default)]
    pub trusted_proxies: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProviderSecrets {
    Single(String),
    Rotating {
        #[serde(default)]
        current: Option<String>,
        #[serde(default)]
        previous: Vec<String>,
        #[serde(default)]
        keys: HashMap<String, String>,
    },
}

impl From<ProviderSecrets> for SecretSet {
    fn from(secrets: ProviderSecrets) -> Self {
        match secrets {
            ProviderSecrets::Single(secret) => SecretSet::single(secret),
            ProviderSecrets::Rotating {
                current,
                previous,
                keys,
            } => SecretSet::rotating(current, previous, keys),
        }
    }
}

impl WebhookConfig {
    fn provider_secrets(&self) -> Result<BTreeMap<String, SecretSet>, ValidationError> {
        let raw = self.secrets_json.expose_secret();
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let parsed: BTreeMap<String, ProviderSecrets> = serde_json::from_str(raw)
            // position only; the message may quote secret text
            .map_err(|e| {
                ValidationError::InvalidWebhookSecrets(format!(
                    "line {} column {}",
                    e.line(),
                    e.column()
                ))
            })?;
        Ok(parsed
            .into_iter()
            .map(|(provider, secrets)| (provider, SecretSet::from(secrets)))
            .collect())
    }

    /// Builds the verifier holding every configured provider.
    pub fn build_verifier(&self) -> Result<SignatureVerifier, ValidationError> {
        let verifier = self
            .provider_secrets()?
            .into_iter()
            .fold(SignatureVerifier::new(self.max_skew_secs), |verifier, (provider, set)| {
                verifier.with_provider(provider, set)
            });
        Ok(verifier)
    }

    /// Validate webhook configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let providers = self.provider_secrets()?;
        if providers.is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK__SECRETS_JSON"));
        }
        if let Some((provider, _)) = providers.iter().find(|(_, set)| set.is_empty()) {
            return Err(ValidationError::EmptySecretSet(provider.clone()));
        }
        if self.max_skew_secs <= 0 {
            return Err(ValidationError::InvalidSkew);
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ValidationError::InvalidRateLimit);
        }
        if let Some(bad) = self
            .trusted_proxies
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .find(|entry| entry.parse::<IpAddr>().is_err())
        {
            return Err(ValidationError::InvalidTrustedProxy(bad.to_string()));
        }
        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secrets_json: empty_secrets(),
            max_skew_secs: default_max_skew(),
            rate_limit_per_minute: default_rate_limit(),
            ip_allowlist: String::new(),
            trusted_proxies: String::new(),
        }
    }
}

fn empty_secrets() -> SecretString {
    SecretString::new(String::new())
}

fn default_max_skew() -> i64 {
    DEFAULT_MAX_SKEW_SECS
}

fn default_rate_limit() -> u32 {
    120
}
