//! Exponential backoff for calls to the model server.
//!
//! Retries on 408, 429 and 5xx responses and on transport errors. Any other
//! non-success status fails immediately.

use anyhow::Result;
use rand::Rng;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;

use kindred_core::config::LlmConfig;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound of the random delay added to every wait.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_factor: 2.0,
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryConfig {
    pub fn from_llm(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_retries + 1,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_jitter: Duration::ZERO,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_factor).min(self.max_delay.as_secs_f64()),
        )
    }

    fn jitter(&self) -> Duration {
        let cap = self.max_jitter.as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..cap))
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Run `operation` until it yields a success response, hits a non-retryable
/// status, or runs out of attempts.
pub async fn with_retry<F, Fut>(config: &RetryConfig, label: &str, operation: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Response>>,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match operation().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(response);
                }

                let body = response.text().await.unwrap_or_default();
                if !is_retryable_status(status) {
                    anyhow::bail!("{} error ({}): {}", label, status, body);
                }
                tracing::warn!(
                    "{} returned {} on attempt {}/{}: {}",
                    label,
                    status,
                    attempt,
                    attempts,
                    body.chars().take(200).collect::<String>()
                );
                last_error = Some(format!("{} ({}): {}", label, status, body));
            }
            Err(e) => {
                tracing::warn!(
                    "{} transport error on attempt {}/{}: {:#}",
                    label,
                    attempt,
                    attempts,
                    e
                );
                last_error = Some(format!("{}: {:#}", label, e));
            }
        }

        if attempt < attempts {
            let wait = delay + config.jitter();
            tracing::debug!("{} retrying in {:.2}s", label, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            delay = config.next_delay(delay);
        }
    }

    anyhow::bail!(
        "{} failed after {} attempts: {}",
        label,
        attempts,
        last_error.unwrap_or_else(|| "unknown error".to_string())
    )
}
