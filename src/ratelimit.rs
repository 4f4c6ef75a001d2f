//! SQLite-backed sliding-window rate limiter.
//!
//! Each accepted request records one row in `rate_limit_hits`. A request is
//! refused when the client already has `max_requests` hits for the endpoint
//! inside the window; refused requests are not recorded.

use anyhow::Result;
use axum::http::HeaderMap;
use sqlx::SqlitePool;

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    pool: SqlitePool,
    max_requests: i64,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, config: &RateLimitConfig) -> Self {
        Self {
            pool,
            max_requests: i64::from(config.max_requests),
            window_secs: i64::from(config.window_minutes) * 60,
        }
    }

    /// Returns true and records a hit when the request is allowed.
    ///
    /// The count and the insert are one statement, so concurrent callers
    /// never hold a read lock that has to be upgraded.
    pub async fn check_and_record(&self, client_key: &str, endpoint: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let window_start = now - self.window_secs;

        let result = sqlx::query(
            r#"
            INSERT INTO rate_limit_hits (client_key, endpoint, hit_at)
            SELECT ?, ?, ?
            WHERE (
                SELECT COUNT(*) FROM rate_limit_hits
                WHERE client_key = ? AND endpoint = ? AND hit_at > ?
            ) < ?
            "#,
        )
        .bind(client_key)
        .bind(endpoint)
        .bind(now)
        .bind(client_key)
        .bind(endpoint)
        .bind(window_start)
        .bind(self.max_requests)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        if let Err(e) = sqlx::query("DELETE FROM rate_limit_hits WHERE hit_at <= ?")
            .bind(window_start)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, "failed to prune expired rate limit hits");
        }

        Ok(true)
    }
}

/// The first `X-Forwarded-For` address, or loopback when absent.
pub fn client_key_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("127.0.0.1")
        .to_string()
}
