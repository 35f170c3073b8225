//! Webhook edge guard for axum.
//!
//! Runs before signature verification on `POST /v1/webhooks/{provider}`:
//! 1. Resolve the client IP from the connection peer (forwarded headers
//!    count only when the peer is a trusted proxy)
//! 2. Reject IPs outside the allowlist (403)
//! 3. Consume one unit of the `(provider, client_ip)` budget (429 when spent)
//!
//! Rate limit status is returned in standard HTTP headers:
//! - `X-RateLimit-Limit`: Maximum requests allowed in the window
//! - `X-RateLimit-Remaining`: Requests remaining in the current window
//! - `X-RateLimit-Reset`: Unix timestamp when the window resets
//! - `Retry-After`: Seconds to wait (only on 429 response)
//!
//! If the limiter backend is unreachable the request is let through.

use std::collections::HashSet;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::adapters::http::billing::ErrorResponse;
use crate::ports::{RateLimitKey, RateLimitResult, RateLimiter};

/// Standard rate limit header names.
pub mod headers {
    use super::HeaderName;

    pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
    pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
    pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
}

/// Client IPs allowed to deliver webhooks. Empty allows everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowlist {
    entries: HashSet<String>,
}

impl IpAllowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parses a comma-separated list, e.g. `"10.0.0.1, 10.0.0.2"`.
    pub fn parse(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allows(&self, client_ip: &str) -> bool {
        self.entries.is_empty() || self.entries.contains(client_ip)
    }
}

/// Reverse proxies allowed to report the client address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies {
    entries: HashSet<IpAddr>,
}

impl TrustedProxies {
    /// Parses a comma-separated list of proxy IPs, e.g. `"10.0.0.5, ::1"`.
    pub fn parse(csv: &str) -> Result<Self, AddrParseError> {
        let entries = csv
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.entries.contains(ip)
    }
}

/// Edge guard middleware state.
#[derive(Clone)]
pub struct EdgeGuardState {
    pub allowlist: Arc<IpAllowlist>,
    pub trusted_proxies: Arc<TrustedProxies>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl EdgeGuardState {
    pub fn new(allowlist: IpAllowlist, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            allowlist: Arc::new(allowlist),
            trusted_proxies: Arc::new(TrustedProxies::default()),
            limiter,
        }
    }

    /// Honors `X-Forwarded-For` from these peers.
    pub fn with_trusted_proxies(mut self, trusted_proxies: TrustedProxies) -> Self {
        self.trusted_proxies = Arc::new(trusted_proxies);
        self
    }
}

/// Allowlist and rate limit check for the webhook receiver.
///
/// Mount with `route_layer` so the `{provider}` path segment is available.
pub async fn edge_guard_middleware(
    State(guard): State<EdgeGuardState>,
    Path(provider): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let client_ip = resolve_client_ip(request.headers(), peer, &guard.trusted_proxies)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !guard.allowlist.allows(&client_ip) {
        tracing::warn!(provider = %provider, client_ip = %client_ip, "Webhook from IP outside allowlist");
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new("FORBIDDEN", "ip not allowed")),
        )
            .into_response();
    }

    let key = RateLimitKey::webhook(&provider, &client_ip);
    let status = match guard.limiter.check(&key).await {
        Ok(RateLimitResult::Allowed(status)) => Some(status),
        Ok(RateLimitResult::Denied(denied)) => {
            tracing::warn!(provider = %provider, client_ip = %client_ip, "Webhook rate limit exceeded");
            return rate_limit_response(denied.limit, denied.retry_after_secs);
        }
        Err(e) => {
            tracing::warn!("Rate limiter unavailable: {}", e);
            None
        }
    };

    let mut response = next.run(request).await;
    if let Some(status) = status {
        add_rate_limit_headers(
            &mut response,
            status.limit,
            status.remaining,
            status.reset_at.as_unix_secs(),
        );
    }
    response
}

/// Resolves the client address used for the allowlist and rate limit key.
///
/// The connection peer is the client unless it is a trusted proxy. For a
/// trusted peer, `X-Forwarded-For` is walked from the right and the first
/// hop that is not itself a trusted proxy wins. Forwarded headers from any
/// other peer are ignored.
fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted: &TrustedProxies,
) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    for hop in forwarded.rsplit(',').map(str::trim).filter(|hop| !hop.is_empty()) {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted.contains(&ip) => continue,
            Ok(ip) => return Some(ip),
            Err(_) => break,
        }
    }
    Some(peer)
}

/// Create a 429 Too Many Requests response.
fn rate_limit_response(limit: u32, retry_after_secs: u32) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse::with_details(
            "RATE_LIMITED",
            "rate limit exceeded",
            serde_json::json!({ "retry_after_secs": retry_after_secs }),
        )),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(headers::X_RATELIMIT_REMAINING.clone(), HeaderValue::from(0u32));
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

fn add_rate_limit_headers(response: &mut Response, limit: u32, remaining: u32, reset_at: i64) {
    let headers = response.headers_mut();
    headers.insert(headers::X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(headers::X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    headers.insert(headers::X_RATELIMIT_RESET.clone(), HeaderValue::from(reset_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    // ════════════════════════════════════════════════════════════════════════════
    // Client IP Tests
    // ════════════════════════════════════════════════════════════════════════════

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn untrusted_peer_is_the_client_whatever_the_headers_say() {
        let trusted = TrustedProxies::default();
        let headers = forwarded("10.0.0.1");

        assert_eq!(
            resolve_client_ip(&headers, Some(ip("198.51.100.9")), &trusted),
            Some(ip("198.51.100.9"))
        );
    }

    #[test]
    fn trusted_proxy_forwards_rightmost_untrusted_hop() {
        let trusted = TrustedProxies::parse("10.0.0.5, 10.0.0.6").unwrap();
        let headers = forwarded("10.0.0.1, 203.0.113.7, 10.0.0.6");

        assert_eq!(
            resolve_client_ip(&headers, Some(ip("10.0.0.5")), &trusted),
            Some(ip("203.0.113.7"))
        );
    }

    #[test]
    fn trusted_proxy_without_usable_header_falls_back_to_peer() {
        let trusted = TrustedProxies::parse("10.0.0.5").unwrap();

        assert_eq!(
            resolve_client_ip(&HeaderMap::new(), Some(ip("10.0.0.5")), &trusted),
            Some(ip("10.0.0.5"))
        );
        assert_eq!(
            resolve_client_ip(&forwarded("not-an-ip"), Some(ip("10.0.0.5")), &trusted),
            Some(ip("10.0.0.5"))
        );
    }

    #[test]
    fn no_peer_means_no_client_ip() {
        let trusted = TrustedProxies::default();
        assert_eq!(resolve_client_ip(&forwarded("10.0.0.1"), None, &trusted), None);
    }

    #[test]
    fn trusted_proxies_reject_non_ip_entries() {
        assert!(TrustedProxies::parse("10.0.0.5, lb.internal").is_err());
        assert_eq!(TrustedProxies::parse("").unwrap(), TrustedProxies::default());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Allowlist Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn empty_allowlist_allows_everyone() {
        let allowlist = IpAllowlist::parse("");
        assert!(allowlist.is_empty());
        assert!(allowlist.allows("203.0.113.9"));
    }

    #[test]
    fn allowlist_matches_trimmed_entries() {
        let allowlist = IpAllowlist::parse("10.0.0.1, 10.0.0.2 ,");
        assert!(allowlist.allows("10.0.0.2"));
        assert!(!allowlist.allows("10.0.0.3"));
    }
}
