//! Retry policy shared by the HTTP collaborators.
//!
//! - HTTP 429 and 5xx → retry
//! - other non-success statuses → returned to the caller immediately
//! - connect, timeout and body errors → retry
//! - backoff: 500ms, 1s, 2s, 4s, 8s, 16s (capped at 2^5)

use std::time::Duration;

use anyhow::Result;
use reqwest::{RequestBuilder, Response, StatusCode};

/// Whether a response status is worth another attempt.
pub fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt` (1-based).
pub fn retry_backoff(attempt: u32) -> Duration {
    let capped = attempt.saturating_sub(1).min(5);
    Duration::from_millis(500 * (1u64 << capped))
}

/// Send the request built by `build`, retrying transient failures.
///
/// `build` is called once per attempt because a sent request cannot be
/// reused. On success or on a non-retryable status the response is
/// returned as-is; the caller decides what a 404 or 400 means.
pub async fn send_with_retry<F>(label: &str, max_retries: u32, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = retry_backoff(attempt);
            tracing::debug!(target: "ragchat::retry", label, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if should_retry(status) && attempt < max_retries {
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(label, attempt, %status, "transient upstream error");
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", label, status, body));
                    continue;
                }
                return Ok(response);
            }
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() => {
                tracing::warn!(label, attempt, error = %e, "upstream request failed");
                last_err = Some(e.into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", label)))
}

/// Turn a non-success response into an error carrying its body.
pub async fn error_for_status(label: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} error {}: {}", label, status, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
        assert!(!should_retry(StatusCode::NOT_FOUND));
        assert!(!should_retry(StatusCode::OK));
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(500));
        assert_eq!(retry_backoff(2), Duration::from_millis(1000));
        assert_eq!(retry_backoff(3), Duration::from_millis(2000));
        assert_eq!(retry_backoff(6), Duration::from_millis(16000));
        assert_eq!(retry_backoff(20), Duration::from_millis(16000));
    }
}
