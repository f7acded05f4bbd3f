//! Resilient HTTP client
//!
//! Wraps `reqwest::Client` with a retry policy: retryable statuses and
//! connection-level failures are retried with exponential backoff, every
//! other outcome is handed back to the caller untouched. The policy holds
//! no state, so one client can be shared by any number of unrelated calls,
//! each with its own retry budget.

use crate::Result;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, IntoUrl, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses whose `Retry-After` header is honoured
const RETRY_AFTER_STATUSES: [u16; 3] = [413, 429, 503];

/// Upper bound for a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Retry configuration shared by all outbound calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base delay in seconds, doubled on every retry
    pub backoff_factor: f64,

    /// Statuses that trigger a retry
    pub status_forcelist: Vec<u16>,

    /// Prefer the server's `Retry-After` over the computed backoff
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 1.0,
            status_forcelist: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn with_status_forcelist(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.status_forcelist = statuses.into();
        self
    }

    /// Whether a response status should be retried
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16())
    }

    /// Whether a transport error happened before a usable response arrived
    pub fn is_retryable_error(&self, error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout() || error.is_request()
    }

    /// Delay before retry number `attempt` (0-based): `backoff_factor * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(0.0);
        let secs = factor * 2f64.powi(attempt.min(63) as i32);
        if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
            return MAX_BACKOFF;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay for a retryable response, honouring `Retry-After` when allowed
    fn delay_for(&self, response: &Response, attempt: u32) -> Duration {
        if self.respect_retry_after && RETRY_AFTER_STATUSES.contains(&response.status().as_u16()) {
            if let Some(secs) = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
            {
                return Duration::from_secs(secs).min(MAX_BACKOFF);
            }
        }
        self.backoff(attempt)
    }
}

/// HTTP client that applies a `RetryPolicy` to every request
#[derive(Debug, Clone)]
pub struct ResilientClient {
    inner: Client,
    policy: RetryPolicy,
}

impl Default for ResilientClient {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ResilientClient {
    /// Create a client with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_client(Client::new(), policy)
    }

    /// Wrap an existing `reqwest::Client`
    pub fn with_client(inner: Client, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn get(&self, url: impl IntoUrl) -> RetryingRequest<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl IntoUrl) -> RetryingRequest<'_> {
        self.request(Method::POST, url)
    }

    pub fn request(&self, method: Method, url: impl IntoUrl) -> RetryingRequest<'_> {
        RetryingRequest {
            client: self,
            builder: self.inner.request(method, url),
        }
    }

    /// Send a prepared request, retrying per the policy
    ///
    /// Returns the first non-retryable response, or the last response once
    /// retries are exhausted. Transport errors are returned after the final
    /// attempt. Callers are expected to check the status themselves.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut attempt: u32 = 0;

        loop {
            // `try_clone` also fails when the builder holds an error; surface that one
            let Some(current) = request.try_clone() else {
                return match request.build() {
                    Err(err) => Err(err.into()),
                    Ok(_) => {
                        Err(anyhow::anyhow!("request body is a stream and cannot be retried").into())
                    }
                };
            };

            match current.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !self.policy.is_retryable_status(status) || attempt >= self.policy.max_retries
                    {
                        return Ok(response);
                    }

                    let delay = self.policy.delay_for(&response, attempt);
                    tracing::warn!(
                        status = status.as_u16(),
                        url = %response.url(),
                        "retryable status, retrying in {:.1}s ({}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if !self.policy.is_retryable_error(&err) || attempt >= self.policy.max_retries {
                        return Err(err.into());
                    }

                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        error = %err,
                        "request failed, retrying in {:.1}s ({}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        self.policy.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            attempt += 1;
        }
    }
}

/// Request builder whose `send` goes through the retry loop
pub struct RetryingRequest<'a> {
    client: &'a ResilientClient,
    builder: RequestBuilder,
}

impl RetryingRequest<'_> {
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.builder = self.builder.header(key, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.builder = self.builder.headers(headers);
        self
    }

    pub fn bearer_auth(mut self, token: impl std::fmt::Display) -> Self {
        self.builder = self.builder.bearer_auth(token);
        self
    }

    pub fn query<T: Serialize + ?Sized>(mut self, query: &T) -> Self {
        self.builder = self.builder.query(query);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, json: &T) -> Self {
        self.builder = self.builder.json(json);
        self
    }

    pub fn form<T: Serialize + ?Sized>(mut self, form: &T) -> Self {
        self.builder = self.builder.form(form);
        self
    }

    pub fn body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.builder = self.builder.body(body);
        self
    }

    pub async fn send(self) -> Result<Response> {
        self.client.send(self.builder).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_backoff_factor(0.0)
    }

    async fn mount_failures(server: &MockServer, status: u16, failures: u64) {
        if failures > 0 {
            Mock::given(method("GET"))
                .and(path("/flaky"))
                .respond_with(ResponseTemplate::new(status))
                .up_to_n_times(failures)
                .with_priority(1)
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .with_priority(2)
            .mount(server)
            .await;
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_factor, 1.0);
        assert!(policy.is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(policy.is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!policy.is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!policy.is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_zero_backoff_factor_never_sleeps() {
        let policy = fast_policy(3);
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(5), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn backoff_never_exceeds_cap(factor in 0.0f64..1000.0, attempt in 0u32..200) {
            let policy = RetryPolicy::default().with_backoff_factor(factor);
            prop_assert!(policy.backoff(attempt) <= MAX_BACKOFF);
        }

        #[test]
        fn backoff_is_monotonic(factor in 0.01f64..10.0, attempt in 0u32..30) {
            let policy = RetryPolicy::default().with_backoff_factor(factor);
            prop_assert!(policy.backoff(attempt) <= policy.backoff(attempt + 1));
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy(3));
        let response = client
            .get(format!("{}/ok", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_retries_min_of_failures_and_budget() {
        for (failures, max_retries) in [(1u64, 3u32), (2, 3), (3, 3), (5, 3), (4, 0), (2, 1)] {
            let server = MockServer::start().await;
            mount_failures(&server, 503, failures).await;

            let client = ResilientClient::new(fast_policy(max_retries));
            let response = client
                .get(format!("{}/flaky", server.uri()))
                .send()
                .await
                .unwrap();

            let retries = failures.min(max_retries as u64);
            let requests = server.received_requests().await.unwrap();
            assert_eq!(
                requests.len() as u64,
                retries + 1,
                "failures={failures} max_retries={max_retries}"
            );

            let expected = if failures > max_retries as u64 { 503 } else { 200 };
            assert_eq!(response.status().as_u16(), expected);
        }
    }

    #[tokio::test]
    async fn test_each_retryable_status_is_retried() {
        for status in [429u16, 500, 502, 503, 504] {
            let server = MockServer::start().await;
            mount_failures(&server, status, 1).await;

            let client = ResilientClient::new(fast_policy(3));
            let response = client
                .get(format!("{}/flaky", server.uri()))
                .send()
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK, "status {status}");
            assert_eq!(server.received_requests().await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_non_retryable_status_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy(3));
        let response = client
            .get(format!("{}/missing", server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "not here");
    }

    #[tokio::test]
    async fn test_post_body_is_replayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy(2));
        let response = client
            .post(format!("{}/generate", server.uri()))
            .json(&serde_json::json!({"prompt": "hello"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            assert_eq!(body["prompt"], "hello");
        }
    }

    #[tokio::test]
    async fn test_retry_after_zero_is_honoured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&server)
            .await;

        // A large backoff factor would stall the test if the header were ignored
        let policy = RetryPolicy::default().with_backoff_factor(60.0);
        let client = ResilientClient::new(policy);
        let response = tokio::time::timeout(
            Duration::from_secs(10),
            client.get(format!("{}/flaky", server.uri())).send(),
        )
        .await
        .expect("Retry-After should override the backoff")
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_connection_error_surfaces_after_retries() {
        // Accept and drop every connection so no response ever arrives
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                drop(stream);
            }
        });

        let client = ResilientClient::new(fast_policy(2));
        let result = client.get(format!("http://{addr}/")).send().await;

        assert!(matches!(result, Err(crate::NotebriefError::Transport(_))));
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_header_surfaces_builder_error() {
        let client = ResilientClient::new(RetryPolicy::none());
        let err = client
            .post("http://127.0.0.1:9/")
            .header("api-key", "bad\nvalue")
            .send()
            .await
            .unwrap_err();

        match err {
            crate::NotebriefError::Transport(e) => assert!(e.is_builder()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
