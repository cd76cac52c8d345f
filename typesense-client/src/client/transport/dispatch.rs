//! The per-call retry loop: select a node, rewrite the request target, send
//! the attempt through the breaker-wrapped executor, classify the outcome,
//! and update node health.

use reqwest::{Request, Response};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::node_pool::NodePool;
use super::BreakerExecutor;
use crate::client::client_error::ClientError;

/// Dispatches one logical request across the node pool with bounded retry.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    pool: NodePool,
    executor: BreakerExecutor,
    num_retries: usize,
    retry_interval: Duration,
    connection_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        pool: NodePool,
        executor: BreakerExecutor,
        num_retries: usize,
        retry_interval: Duration,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            executor,
            num_retries,
            retry_interval,
            connection_timeout,
        }
    }

    /// Executes the request, retrying across nodes on transport errors and
    /// 5xx responses until `num_retries` attempts are exhausted.
    ///
    /// Requires a rewindable body: a streamed body cannot be cloned, so it
    /// gets a single best-effort attempt and any retry need surfaces the
    /// last observed failure instead.
    pub(crate) async fn dispatch(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        if self.pool.is_empty() {
            // No nodes configured: pass the request through untouched.
            return self.attempt(request, cancel).await;
        }

        // num_retries = 0 still means one attempt.
        let attempts = self.num_retries.max(1);
        let mut original = Some(request);
        let mut last: Option<ClientError> = None;

        for attempt in 0..attempts {
            let Some((slot, node_url)) = self.pool.pick_next() else {
                break;
            };
            let mut outgoing = match original.as_ref().and_then(Request::try_clone) {
                Some(clone) => clone,
                // Non-replayable body: consume the original for a single
                // best-effort attempt.
                None => match original.take() {
                    Some(request) => request,
                    None => break,
                },
            };
            rewrite_target(outgoing.url_mut(), &node_url)?;

            match self.attempt(outgoing, cancel).await {
                Ok(response) => {
                    self.pool.mark(slot, true);
                    debug!(
                        "dispatcher: attempt {attempt} against {node_url} returned {}",
                        response.status()
                    );
                    return Ok(response);
                }
                Err(err) if err.is_retriable() => {
                    self.pool.mark(slot, false);
                    warn!("dispatcher: attempt {attempt} against {node_url} failed: {err}");
                    last = Some(err);
                    if attempt + 1 < attempts && !self.retry_interval.is_zero() {
                        tokio::select! {
                            _ = time::sleep(self.retry_interval) => {}
                            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        }
                    }
                }
                // Cancellation and breaker rejections abort the loop; the
                // next logical call may find the breaker half-open.
                Err(err) => return Err(err),
            }
        }

        Err(last.unwrap_or_else(|| {
            ClientError::ConfigError("no attempt could be made against any node".to_string())
        }))
    }

    // One attempt with the per-attempt timeout stamped on, racing the
    // caller's cancellation.
    async fn attempt(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClientError> {
        if request.timeout().is_none() && !self.connection_timeout.is_zero() {
            *request.timeout_mut() = Some(self.connection_timeout);
        }
        tokio::select! {
            result = self.executor.execute(request) => result,
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
        }
    }
}

/// Overwrites the request URL's scheme and authority with the node's,
/// leaving path, query, and headers untouched.
fn rewrite_target(target: &mut Url, node: &Url) -> Result<(), ClientError> {
    target
        .set_scheme(node.scheme())
        .map_err(|_| ClientError::InvalidUrl(node.to_string()))?;
    target
        .set_host(node.host_str())
        .map_err(|_| ClientError::InvalidUrl(node.to_string()))?;
    target
        .set_port(node.port())
        .map_err(|_| ClientError::InvalidUrl(node.to_string()))?;
    Ok(())
}
