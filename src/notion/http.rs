use anyhow::{Context, Result};
use rand::Rng;
use reqwest::{Client, Request, Response};
use std::time::Duration;
use tracing::warn;

use crate::config;

/// Outbound HTTP client that retries transport failures with linear jittered
/// backoff. API responses, including 4xx/5xx, are returned untouched.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    inner: Client,
    retry_max: u32,
    wait_min: Duration,
    wait_max: Duration,
}

impl RetryingClient {
    pub fn new(inner: Client, retry_max: u32, wait_min: Duration, wait_max: Duration) -> Self {
        Self {
            inner,
            retry_max,
            wait_min,
            wait_max: wait_max.max(wait_min),
        }
    }

    pub fn from_config(cfg: &config::Http) -> Result<Self> {
        let inner = Client::builder()
            .user_agent(concat!("notion-stix/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::new(
            inner,
            cfg.retry_max,
            Duration::from_millis(cfg.retry_wait_min_ms),
            Duration::from_millis(cfg.retry_wait_max_ms),
        ))
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Wait before retry number `attempt` (1-based): uniform in
    /// `[wait_min * attempt, wait_max * attempt]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let lo = self.wait_min * attempt;
        let hi = self.wait_max * attempt;
        if hi <= lo {
            return lo;
        }
        let millis = rand::thread_rng().gen_range(lo.as_millis()..=hi.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let mut attempt = 0u32;
        let mut pending = request;
        loop {
            // Streaming bodies cannot be cloned; those get a single attempt.
            let retry_copy = pending.try_clone();
            match self.inner.execute(pending).await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    let retryable = err.is_connect() || err.is_timeout() || err.is_request();
                    let next = match retry_copy {
                        Some(next) if retryable && attempt < self.retry_max => next,
                        _ => return Err(err),
                    };
                    attempt += 1;
                    let wait = self.backoff(attempt);
                    warn!(
                        ?err,
                        attempt,
                        max = self.retry_max,
                        wait_ms = wait.as_millis() as u64,
                        "transport error talking to Notion; retrying"
                    );
                    tokio::time::sleep(wait).await;
                    pending = next;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(retry_max: u32) -> RetryingClient {
        RetryingClient::new(
            Client::builder().no_proxy().build().unwrap(),
            retry_max,
            Duration::from_millis(10),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn backoff_grows_linearly_within_jitter_bounds() {
        let c = client(3);
        for attempt in 1..=3u32 {
            for _ in 0..50 {
                let wait = c.backoff(attempt);
                assert!(wait >= Duration::from_millis(10 * attempt as u64));
                assert!(wait <= Duration::from_millis(20 * attempt as u64));
            }
        }
    }

    #[test]
    fn max_below_min_is_clamped() {
        let c = RetryingClient::new(
            Client::new(),
            1,
            Duration::from_millis(50),
            Duration::from_millis(5),
        );
        assert_eq!(c.backoff(2), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_surfaced() {
        // Bind then drop to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let c = client(2);
        let req = c
            .inner()
            .post(format!("http://{addr}/v1/pages"))
            .body("{}")
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        let err = c.execute(req).await.unwrap_err();
        assert!(err.is_connect());
        // Two retries: at least 10ms + 20ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
