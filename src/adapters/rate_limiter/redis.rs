//! Redis-backed rate limiter for multi-instance deployments.
//!
//! Uses a fixed-window counter algorithm with Redis INCR + EXPIRE, so every
//! instance sharing the Redis server draws from the same budget.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    RateLimitDenied, RateLimitError, RateLimitKey, RateLimitResult, RateLimitStatus, RateLimiter,
};

use super::in_memory::WINDOW_SECS;

/// Redis-backed rate limiter.
///
/// 1. INCR the key to increment the counter
/// 2. If count is 1, set EXPIRE for the window duration
/// 3. If count > limit, deny the request
///
/// Requests can briefly exceed the limit at window boundaries.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: MultiplexedConnection,
    requests_per_minute: u32,
}

impl RedisRateLimiter {
    pub fn new(conn: MultiplexedConnection, requests_per_minute: u32) -> Self {
        Self {
            conn,
            requests_per_minute,
        }
    }
}

fn unavailable(e: redis::RedisError) -> RateLimitError {
    RateLimitError::Unavailable(e.to_string())
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &RateLimitKey) -> Result<RateLimitResult, RateLimitError> {
        let redis_key = key.to_redis_key();
        let limit = self.requests_per_minute;
        let mut conn = self.conn.clone();

        let count: i64 = conn.incr(&redis_key, 1_i64).await.map_err(unavailable)?;
        if count == 1 {
            conn.expire::<_, ()>(&redis_key, WINDOW_SECS)
                .await
                .map_err(unavailable)?;
        }

        let ttl: i64 = conn.ttl(&redis_key).await.map_err(unavailable)?;
        let reset_secs = if ttl > 0 { ttl } else { WINDOW_SECS };

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if count > limit {
            return Ok(RateLimitResult::Denied(RateLimitDenied {
                limit,
                retry_after_secs: u32::try_from(reset_secs).unwrap_or(u32::MAX).max(1),
            }));
        }

        Ok(RateLimitResult::Allowed(RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: Timestamp::now().plus_secs(reset_secs),
        }))
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key.to_redis_key()).await.map_err(unavailable)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .finish_non_exhaustive()
    }
}
