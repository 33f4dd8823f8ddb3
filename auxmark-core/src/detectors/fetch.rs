//! Retry-aware HTTP fetching shared by the built-in detectors.
//!
//! Failures are split into two classes: retryable (connection errors,
//! timeouts, HTTP 429 and 5xx) and permanent (everything else, typically
//! 4xx). Retryable failures back off exponentially until the attempt
//! budget runs out; permanent failures give up immediately.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget and backoff shape for one logical fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Clamped to at least one.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff: f64,
}

enum FetchFailure {
    Retryable(String),
    Permanent(String),
}

/// Fetches `url` under `policy` and returns the response body, or `None`
/// once the failure is permanent or the attempts are spent.
pub async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    policy: &RetryPolicy,
) -> Option<Vec<u8>> {
    let attempts = policy.attempts.max(1);
    let mut delay = policy.base_delay;

    for attempt in 1..=attempts {
        let failure = match fetch_once(client, url).await {
            Ok(body) => {
                if attempt > 1 {
                    debug!(url, attempt, "fetch succeeded after retry");
                }
                return Some(body);
            }
            Err(failure) => failure,
        };

        match failure {
            FetchFailure::Permanent(reason) => {
                warn!(url, %reason, "permanent fetch failure, not retrying");
                return None;
            }
            FetchFailure::Retryable(reason) if attempt < attempts => {
                debug!(
                    url,
                    attempt,
                    attempts,
                    %reason,
                    delay_secs = delay.as_secs_f64(),
                    "fetch failed, retrying"
                );
                sleep(delay).await;
                delay = next_delay(delay, policy.backoff);
            }
            FetchFailure::Retryable(reason) => {
                warn!(url, attempts, %reason, "fetch failed after all attempts");
                return None;
            }
        }
    }

    None
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<Vec<u8>, FetchFailure> {
    let response = client.get(url).send().await.map_err(|err| {
        // Connection failures and timeouts surface here.
        FetchFailure::Retryable(err.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        let message = format!("HTTP {status}");
        return if retryable_status(status) {
            Err(FetchFailure::Retryable(message))
        } else {
            Err(FetchFailure::Permanent(message))
        };
    }

    match response.bytes().await {
        Ok(bytes) => Ok(bytes.to_vec()),
        Err(err) => Err(FetchFailure::Retryable(format!(
            "failed to read response body: {err}"
        ))),
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn next_delay(delay: Duration, backoff: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * backoff)
        .unwrap_or(Duration::ZERO)
}
