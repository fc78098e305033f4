//! Bounded retries for transient failures
//!
//! Wraps another [`Transport`]. Network failures, 408, 429 and 5xx answers
//! are retried with exponential backoff; every other answer, 401 included,
//! is returned as is so the session can handle it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.request_retries,
            base_delay: config.request_retry_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-based): base * 2^retry.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn execute(
        &self,
        request: ApiRequest,
        bearer: Option<String>,
    ) -> Result<ApiResponse, TransportError> {
        let mut retry = 0;
        loop {
            let result = self.inner.execute(request.clone(), bearer.clone()).await;
            let reason = match result {
                Ok(ref resp) if is_retryable_status(resp.status) => format!("HTTP {}", resp.status),
                Err(ref e) => e.to_string(),
                Ok(_) => return result,
            };
            if retry >= self.policy.max_retries {
                tracing::debug!(
                    "{} {} failed after {} retries: {}",
                    request.method,
                    request.path,
                    retry,
                    reason
                );
                return result;
            }

            let delay = self.policy.backoff(retry);
            retry += 1;
            tracing::warn!(
                "{} {}: {}, retrying in {}ms ({}/{})",
                request.method,
                request.path,
                reason,
                delay.as_millis(),
                retry,
                self.policy.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{json_response, network_error, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    const EVENTS: &str = "/events";

    fn retrying(mock: Arc<MockTransport>) -> RetryTransport {
        RetryTransport::new(mock, RetryPolicy::default())
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retried_with_backoff() {
        let mock = MockTransport::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        mock.on(EVENTS, move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                json_response(503, serde_json::json!({}))
            } else {
                json_response(200, serde_json::json!({"ok": true}))
            }
        });
        let transport = retrying(mock.clone());

        let started = Instant::now();
        let resp = assert_ok!(transport.execute(ApiRequest::get(EVENTS), None).await);
        assert_eq!(resp.status, 200);
        assert_eq!(mock.count(EVENTS), 3);
        // 1s + 2s of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_retries() {
        let mock = MockTransport::new();
        mock.on(EVENTS, |_, _| network_error());
        let transport = retrying(mock.clone());

        assert_err!(transport.execute(ApiRequest::get(EVENTS), None).await);
        assert_eq!(mock.count(EVENTS), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_and_request_timeout_are_retried() {
        for status in [408, 429] {
            let mock = MockTransport::new();
            mock.on(EVENTS, move |_, _| json_response(status, serde_json::json!({})));
            let transport = retrying(mock.clone());

            let resp = assert_ok!(transport.execute(ApiRequest::get(EVENTS), None).await);
            assert_eq!(resp.status, status);
            assert_eq!(mock.count(EVENTS), 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_returned_immediately() {
        for status in [400, 401, 403, 404] {
            let mock = MockTransport::new();
            mock.on(EVENTS, move |_, _| json_response(status, serde_json::json!({})));
            let transport = retrying(mock.clone());

            let resp = assert_ok!(
                transport
                    .execute(ApiRequest::get(EVENTS), Some("t".into()))
                    .await
            );
            assert_eq!(resp.status, status);
            assert_eq!(mock.count(EVENTS), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_renews_once_through_retrying_transport() {
        use crate::auth::{AccessCredential, Session, SessionSettings};
        use crate::testing::{future_token, MemoryFlag};

        let mock = MockTransport::new();
        let fresh = future_token("fresh", 15);
        let valid = fresh.clone();
        let flaky = Arc::new(AtomicUsize::new(0));
        let seen = flaky.clone();
        mock.on(EVENTS, move |_, bearer| {
            if bearer != Some(valid.as_str()) {
                json_response(401, serde_json::json!({}))
            } else if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                json_response(502, serde_json::json!({}))
            } else {
                json_response(200, serde_json::json!({}))
            }
        });
        mock.on("/auth/refresh-token", move |_, _| {
            json_response(200, serde_json::json!({ "accessToken": fresh }))
        });
        let session = Session::new(
            Arc::new(retrying(mock.clone())),
            Arc::new(MemoryFlag::new(false)),
            SessionSettings::default(),
        );
        session.install_credential(AccessCredential::new(future_token("stale", 15)));

        assert_ok!(session.call(ApiRequest::get(EVENTS)).await);
        assert_eq!(mock.count("/auth/refresh-token"), 1);
        // 401, then 502 and 200 with the renewed credential.
        assert_eq!(mock.count(EVENTS), 3);
    }
}
