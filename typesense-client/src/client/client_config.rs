//! Configuration for the [`Client`](super::Client).

use reqwest::Request;
use std::{sync::Arc, time::Duration};

use super::client_error::ClientError;
use super::transport::circuit_breaker::BreakerSettings;
use super::transport::{Clock, RequestExecutor};

/// A pre-dispatch hook that mutates the outgoing request, typically to add
/// tracing headers. Editors run once per logical call, in registration
/// order, before the retry loop; they never see per-attempt state.
pub type RequestEditor = Arc<dyn Fn(&mut Request) -> Result<(), ClientError> + Send + Sync>;

/// Knobs for building a [`Client`](super::Client). Endpoint selection is
/// exactly one of `server_url`, `nodes`, or `nearest_node` + `nodes`;
/// providing both `server_url` and `nodes` is a configuration error.
pub struct ClientConfig {
    /// A single endpoint: no load balancing, a single attempt per call.
    pub server_url: Option<String>,
    /// Equivalent replica endpoints rotated round-robin.
    pub nodes: Vec<String>,
    /// A replica preferred over `nodes` whenever it is healthy.
    pub nearest_node: Option<String>,
    /// Sent on every attempt as the `X-TYPESENSE-API-KEY` header.
    pub api_key: String,
    /// Minimum cool-down before an unhealthy node is tried again.
    pub healthcheck_interval: Duration,
    /// Maximum attempts per logical call. Defaults to the number of member
    /// nodes, plus one when a nearest node is configured.
    pub num_retries: Option<usize>,
    /// Pause between two consecutive attempts within one logical call.
    pub retry_interval: Duration,
    /// Per-attempt wall-clock budget.
    pub connection_timeout: Duration,
    /// Settings for the process-wide circuit breaker around the executor.
    pub breaker: BreakerSettings,
    /// Pre-dispatch request editors, applied in registration order.
    pub editors: Vec<RequestEditor>,
    /// Replaces the reqwest-backed executor, mainly for tests.
    pub executor: Option<Arc<dyn RequestExecutor>>,
    /// Replaces the system clock, mainly for tests.
    pub clock: Option<Arc<dyn Clock>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            nodes: Vec::new(),
            nearest_node: None,
            api_key: String::new(),
            healthcheck_interval: Duration::from_secs(60),
            num_retries: None,
            retry_interval: Duration::from_millis(100),
            connection_timeout: Duration::from_secs(5),
            breaker: BreakerSettings::default(),
            editors: Vec::new(),
            executor: None,
            clock: None,
        }
    }
}
