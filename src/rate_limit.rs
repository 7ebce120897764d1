/// Rate limiting, keyed by client IP
///
/// Counters live in the shared store as fixed windows with TTL expiry, not
/// in process memory, so any number of horizontally-scaled workers share
/// the same budget.
use crate::{
    config::RateLimitSettings,
    error::{AdmissionError, AdmissionResult},
};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Clone)]
pub struct RateLimiter {
    db: SqlitePool,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(db: SqlitePool, settings: RateLimitSettings) -> Self {
        Self { db, settings }
    }

    /// Count one request against an IP's current window. Errs with
    /// RateLimitExceeded when the window budget is spent.
    pub async fn check(&self, client_ip: &str) -> AdmissionResult<()> {
        if !self.settings.enabled {
            return Ok(());
        }

        let now = Utc::now();
        let window = Duration::seconds(self.settings.window_secs);
        let cutoff = now - window;

        // Expired window rows reset in place; the upsert is a single
        // atomic statement so racing workers cannot double-reset.
        sqlx::query(
            r#"
            INSERT INTO rate_limit_bucket (bucket_key, window_start, request_count)
            VALUES (?1, ?3, 1)
            ON CONFLICT(bucket_key) DO UPDATE SET
                request_count = CASE
                    WHEN rate_limit_bucket.window_start < ?2 THEN 1
                    ELSE rate_limit_bucket.request_count + 1
                END,
                window_start = CASE
                    WHEN rate_limit_bucket.window_start < ?2 THEN ?3
                    ELSE rate_limit_bucket.window_start
                END
            "#,
        )
        .bind(client_ip)
        .bind(cutoff.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        let row = sqlx::query(
            "SELECT request_count, window_start FROM rate_limit_bucket WHERE bucket_key = ?",
        )
        .bind(client_ip)
        .fetch_one(&self.db)
        .await?;

        let count: i64 = row.get("request_count");
        if count > self.settings.requests_per_window {
            let window_start_raw: String = row.get("window_start");
            let retry_after = DateTime::parse_from_rfc3339(&window_start_raw)
                .map(|start| {
                    let remaining = start.with_timezone(&Utc) + window - now;
                    remaining.to_std().unwrap_or_default()
                })
                .unwrap_or_default();

            return Err(AdmissionError::RateLimitExceeded { retry_after });
        }

        Ok(())
    }

    /// Drop windows that expired before the cutoff. For a periodic sweeper;
    /// correctness never depends on it since stale rows reset on next use.
    pub async fn evict_expired(&self) -> AdmissionResult<u64> {
        let cutoff = Utc::now() - Duration::seconds(self.settings.window_secs);
        let result = sqlx::query("DELETE FROM rate_limit_bucket WHERE window_start < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client_ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match ctx.rate_limiter.check(&client_ip).await {
        Ok(()) => Ok(next.run(request).await),
        Err(AdmissionError::RateLimitExceeded { .. }) => Err(StatusCode::TOO_MANY_REQUESTS),
        Err(e) => {
            // A store hiccup should not take the whole surface down
            tracing::warn!("Rate limit check failed open: {}", e);
            Ok(next.run(request).await)
        }
    }
}
