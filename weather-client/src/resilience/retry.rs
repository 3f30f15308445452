//! Bounded retries of a single upstream GET.
//!
//! Only 5xx responses are retried. Client errors are returned as-is for the
//! classifier, and transport failures end the fetch immediately.

use reqwest::Url;

use crate::{
    CallContext, WeatherError,
    resilience::RetryPolicy,
    transport::{RawResponse, Transport, TransportError},
};

#[derive(Debug, Clone)]
pub struct RetryingFetcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// GET `url`, retrying server errors until the attempt budget runs out.
    ///
    /// The last 5xx response is returned once attempts are exhausted. Both the
    /// request and the backoff sleep are abandoned when `ctx` expires or is
    /// cancelled.
    pub async fn fetch(&self, url: &Url, ctx: &CallContext) -> Result<RawResponse, WeatherError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        loop {
            let response = match ctx.run(self.transport.get(url)).await? {
                Ok(response) => response,
                Err(TransportError::Timeout(msg)) => return Err(WeatherError::Timeout(msg)),
                Err(TransportError::Other(msg)) => {
                    return Err(WeatherError::Internal(format!("HTTP request failed: {msg}")));
                }
            };

            if !response.is_server_error() {
                return Ok(response);
            }

            attempt += 1;
            if attempt >= max_attempts {
                tracing::warn!(
                    path = url.path(),
                    status = response.status,
                    attempts = attempt,
                    "upstream still failing, giving up"
                );
                return Ok(response);
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!(
                path = url.path(),
                status = response.status,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "upstream server error, retrying"
            );
            ctx.run(tokio::time::sleep(delay)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) }
        }

        fn statuses(statuses: &[u16]) -> Self {
            Self::new(statuses.iter().map(|s| Ok(RawResponse::new(*s, format!("status {s}")))).collect())
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &Url) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("script exhausted".into())))
        }
    }

    #[derive(Debug)]
    struct SlowTransport(Duration);

    #[async_trait]
    impl Transport for SlowTransport {
        async fn get(&self, _url: &Url) -> Result<RawResponse, TransportError> {
            tokio::time::sleep(self.0).await;
            Ok(RawResponse::new(200, "{}"))
        }
    }

    fn url() -> Url {
        Url::parse("http://upstream.test/data/2.5/weather?q=Paris").unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(150))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_error_then_returns_success() {
        let fetcher = RetryingFetcher::new(ScriptedTransport::statuses(&[503, 200]), policy());
        let start = Instant::now();

        let response = fetcher.fetch(&url(), &CallContext::new()).await.unwrap();

        let elapsed = start.elapsed();
        assert_eq!(response.status, 200);
        assert_eq!(fetcher.transport().calls(), 2);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(3 * 150 + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_server_error_when_attempts_exhausted() {
        let fetcher = RetryingFetcher::new(ScriptedTransport::statuses(&[500, 502, 503, 200]), policy());
        let start = Instant::now();

        let response = fetcher.fetch(&url(), &CallContext::new()).await.unwrap();

        assert_eq!(response, RawResponse::new(503, "status 503"));
        assert_eq!(fetcher.transport().calls(), 3);
        // 100ms, then 200ms capped to 150ms
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn never_retries_client_errors() {
        for status in [400, 401, 404] {
            let fetcher = RetryingFetcher::new(ScriptedTransport::statuses(&[status, 200]), policy());

            let response = fetcher.fetch(&url(), &CallContext::new()).await.unwrap();

            assert_eq!(response.status, status);
            assert_eq!(fetcher.transport().calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_does_not_retry() {
        let fetcher = RetryingFetcher::new(ScriptedTransport::statuses(&[500, 200]), RetryPolicy::no_retry());

        let response = fetcher.fetch(&url(), &CallContext::new()).await.unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(fetcher.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_timeout_is_tagged_and_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout("operation timed out".into())),
            Ok(RawResponse::new(200, "{}")),
        ]);
        let fetcher = RetryingFetcher::new(transport, policy());

        let err = fetcher.fetch(&url(), &CallContext::new()).await.unwrap_err();

        assert_eq!(err, WeatherError::Timeout("operation timed out".into()));
        assert_eq!(fetcher.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_transport_failure_is_internal() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Other("connection refused".into()))]);
        let fetcher = RetryingFetcher::new(transport, policy());

        let err = fetcher.fetch(&url(), &CallContext::new()).await.unwrap_err();

        assert!(matches!(err, WeatherError::Internal(ref msg) if msg.contains("connection refused")));
        assert_eq!(fetcher.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let slow_policy = RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(10));
        let fetcher = RetryingFetcher::new(ScriptedTransport::statuses(&[503, 200]), slow_policy);
        let token = CancellationToken::new();
        let ctx = CallContext::new().with_cancellation(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let start = Instant::now();
        let err = fetcher.fetch(&url(), &ctx).await.unwrap_err();

        assert!(matches!(err, WeatherError::Timeout(_)));
        assert_eq!(fetcher.transport().calls(), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_request() {
        let fetcher = RetryingFetcher::new(SlowTransport(Duration::from_secs(30)), policy());
        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));

        let err = fetcher.fetch(&url(), &ctx).await.unwrap_err();

        assert_eq!(err, WeatherError::Timeout("request deadline exceeded".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_context_skips_the_request() {
        let transport = ScriptedTransport::statuses(&[200]);
        let fetcher = RetryingFetcher::new(transport, policy());
        let token = CancellationToken::new();
        token.cancel();

        let err = fetcher
            .fetch(&url(), &CallContext::new().with_cancellation(token))
            .await
            .unwrap_err();

        assert!(matches!(err, WeatherError::Timeout(_)));
        assert_eq!(fetcher.transport().calls(), 0);
    }
}
