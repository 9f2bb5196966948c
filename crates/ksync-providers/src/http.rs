use crate::github_models::ErrorBody;
use crate::redact::Scrubber;
use ksync_core::clock::now_secs;
use ksync_core::error::{NotFoundTarget, SyncError};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Server-requested waits at or beyond this surface immediately.
    pub max_server_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_server_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Sends the request built by `build`, retrying transient failures.
///
/// Non-success statuses are classified with [`classify_status`]; messages
/// pass through `scrubber` before they are stored in the error.
pub async fn send_with_retry<F>(
    mut build: F,
    policy: &RetryPolicy,
    scrubber: &Scrubber,
    not_found: &NotFoundTarget,
) -> Result<Response, SyncError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let (err, server_delay) = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let now = now_secs();
                let status = response.status();
                let headers = response.headers().clone();
                let message = scrubber.scrub(&error_message(response).await);
                (
                    classify_status(status, &headers, message, not_found, now),
                    retry_delay_from_headers(&headers, now),
                )
            }
            Err(err) => (transport_error(&err, scrubber), None),
        };
        if !err.is_retryable() || attempt >= policy.max_attempts {
            return Err(err);
        }
        let delay = match server_delay {
            Some(delay) if delay >= policy.max_server_delay => return Err(err),
            Some(delay) => delay,
            None => policy.backoff(attempt),
        };
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request failed; retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Maps a non-success response to the error taxonomy.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    message: String,
    not_found: &NotFoundTarget,
    now: u64,
) -> SyncError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && header_u64(headers, "x-ratelimit-remaining") == Some(0));
    if rate_limited {
        let reset_at = header_u64(headers, "x-ratelimit-reset")
            .or_else(|| header_u64(headers, "retry-after").map(|secs| now.saturating_add(secs)));
        return SyncError::RateLimited { message, reset_at };
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Authentication { message }
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(not_found.clone()),
        _ => SyncError::Api {
            status: status.as_u16(),
            message,
            retryable: is_retryable_status(status),
        },
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn transport_error(err: &reqwest::Error, scrubber: &Scrubber) -> SyncError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        scrubber.scrub(&err.to_string())
    };
    SyncError::Network { message }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let fallback = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|body| body.message)
            .filter(|message| !message.is_empty())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

pub fn retry_delay_from_headers(headers: &HeaderMap, now: u64) -> Option<Duration> {
    if let Some(delay) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(delay));
    }
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    if header_u64(headers, "x-ratelimit-remaining") != Some(0) || reset <= now {
        return None;
    }
    Some(Duration::from_secs(reset - now))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
