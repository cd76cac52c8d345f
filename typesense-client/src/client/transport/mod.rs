//! The resilient multi-endpoint transport underneath every client call.
//!
//! A request flows through the [`Dispatcher`](dispatch::Dispatcher), which
//! picks a node from the [`NodePool`](node_pool::NodePool), rewrites the
//! request target, and executes it through a [`CircuitBreaker`]-wrapped
//! [`RequestExecutor`].

pub mod circuit_breaker;
pub(crate) mod dispatch;
pub(crate) mod node_pool;

use async_trait::async_trait;
use reqwest::{Request, Response};
use std::{
    fmt::Debug,
    sync::Arc,
    time::Instant,
};

use crate::client::client_error::{ClientError, HttpPayload};
use circuit_breaker::CircuitBreaker;

/// A monotonic millisecond clock.
///
/// Injected per client so node-health cool-downs and breaker timers can be
/// driven deterministically in tests. Never a process-wide singleton.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds elapsed since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// The default [`Clock`], anchored at its own construction time.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// A manually advanced clock for deterministic tests.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(now_ms: u64) -> Self {
        Self(std::sync::atomic::AtomicU64::new(now_ms))
    }

    pub(crate) fn advance_ms(&self, delta: u64) {
        self.0.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn set_ms(&self, now_ms: u64) {
        self.0.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Sends one HTTP request and produces one response.
///
/// The default implementation wraps a [`reqwest::Client`]; tests substitute
/// scripted executors.
#[async_trait]
pub trait RequestExecutor: Send + Sync + Debug {
    /// Executes the request. Transport-level failures (connect, DNS, TLS,
    /// per-attempt timeout) come back as [`ClientError::TransportError`].
    async fn execute(&self, request: Request) -> Result<Response, ClientError>;
}

/// A [`RequestExecutor`] backed by a [`reqwest::Client`].
#[derive(Debug)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    /// Wraps an existing client; the connection pool is shared across all
    /// attempts and logical calls.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.client
            .execute(request)
            .await
            .map_err(|err| ClientError::TransportError(Box::new(err)))
    }
}

/// Composes the circuit breaker around an executor: every outbound call is
/// counted, and while the breaker is open calls short-circuit without any
/// network traffic.
#[derive(Debug)]
pub(crate) struct BreakerExecutor {
    inner: Arc<dyn RequestExecutor>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerExecutor {
    pub(crate) fn new(inner: Arc<dyn RequestExecutor>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    /// Executes under the breaker. A response with status >= 500 is turned
    /// into a synthetic [`ClientError::ServerError`] so the breaker counts
    /// it as a failure; the dispatcher classifies that error as "this
    /// replica is unhealthy" and retries elsewhere.
    pub(crate) async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.breaker
            .execute(|| async {
                let response = self.inner.execute(request).await?;
                let status = response.status();
                if status.is_server_error() {
                    let body = response
                        .bytes()
                        .await
                        .map(|bytes| bytes.to_vec())
                        .unwrap_or_default();
                    return Err(ClientError::ServerError(HttpPayload {
                        status: status.as_u16(),
                        body,
                    }));
                }
                Ok(response)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::circuit_breaker::{BreakerSettings, Counts};
    use http::Method;
    use std::sync::Mutex;
    use url::Url;

    #[derive(Debug)]
    struct FixedStatusExecutor {
        status: u16,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl RequestExecutor for FixedStatusExecutor {
        async fn execute(&self, _request: Request) -> Result<Response, ClientError> {
            *self.calls.lock().unwrap() += 1;
            let response = http::Response::builder()
                .status(self.status)
                .body("oops".to_string())
                .unwrap();
            Ok(response.into())
        }
    }

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("http://localhost:8108/health").unwrap())
    }

    fn wrapped(status: u16) -> (BreakerExecutor, Arc<CircuitBreaker>) {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerSettings {
                ready_to_trip: Some(Arc::new(|c: &Counts| c.consecutive_failures >= 2)),
                ..BreakerSettings::default()
            },
            clock,
        ));
        let executor = Arc::new(FixedStatusExecutor {
            status,
            calls: Mutex::new(0),
        });
        (BreakerExecutor::new(executor, breaker.clone()), breaker)
    }

    #[tokio::test]
    async fn server_error_becomes_synthetic_failure() {
        let (executor, breaker) = wrapped(502);
        let err = executor.execute(request()).await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError(_)));
        assert_eq!(err.status(), Some(502));
        assert_eq!(format!("{err}"), "status: 502 response: oops");
        assert_eq!(breaker.counts().total_failures, 1);
    }

    #[tokio::test]
    async fn client_errors_pass_through_as_success() {
        let (executor, breaker) = wrapped(404);
        let response = executor.execute(request()).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
        assert_eq!(breaker.counts().total_successes, 1);
        assert_eq!(breaker.counts().total_failures, 0);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_network() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = Arc::new(CircuitBreaker::new(
            BreakerSettings {
                ready_to_trip: Some(Arc::new(|c: &Counts| c.consecutive_failures >= 2)),
                ..BreakerSettings::default()
            },
            clock,
        ));
        let raw = Arc::new(FixedStatusExecutor {
            status: 500,
            calls: Mutex::new(0),
        });
        let executor = BreakerExecutor::new(raw.clone(), breaker);

        executor.execute(request()).await.unwrap_err();
        executor.execute(request()).await.unwrap_err();

        // Two consecutive failures tripped the breaker; the next call must
        // not reach the raw executor.
        let err = executor.execute(request()).await.unwrap_err();
        assert!(matches!(err, ClientError::BreakerOpen));
        assert_eq!(*raw.calls.lock().unwrap(), 2);
    }
}
