//! In-memory rate limiter for tests and single-instance deployments.
//!
//! Uses a fixed-window counter per key in a HashMap. Counters are local to
//! the process, so several instances behind a load balancer each grant the
//! full budget.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    Clock, RateLimitDenied, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStatus,
    RateLimiter,
};

/// Length of one counting window.
pub const WINDOW_SECS: i64 = 60;

/// State for a single rate limit window.
#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: Timestamp,
}

pub struct InMemoryRateLimiter {
    requests_per_minute: u32,
    clock: Arc<dyn Clock>,
    windows: RwLock<HashMap<RateLimitKey, WindowState>>,
}

impl InMemoryRateLimiter {
    pub fn new(requests_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests_per_minute,
            clock,
            windows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let limit = self.requests_per_minute;
        let now = self.clock.now();

        let mut windows = self.windows.write().await;
        let state = windows.entry(key.clone()).or_insert(WindowState {
            count: 0,
            window_start: now,
        });

        let window_end = state.window_start.plus_secs(WINDOW_SECS);
        if !now.is_before(&window_end) {
            state.count = 0;
            state.window_start = now;
        }
        let reset_at = state.window_start.plus_secs(WINDOW_SECS);

        if state.count >= limit {
            let retry_after = reset_at.as_unix_secs().saturating_sub(now.as_unix_secs()).max(1);
            return Ok(RateLimitResult::Denied(RateLimitDenied {
                limit,
                retry_after_secs: u32::try_from(retry_after).unwrap_or(u32::MAX),
            }));
        }

        state.count += 1;
        Ok(RateLimitResult::Allowed(RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(state.count),
            reset_at,
        }))
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        self.windows.write().await.remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .finish_non_exhaustive()
    }
}
