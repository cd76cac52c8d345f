//! A builder for [`Client`].

use std::{sync::Arc, time::Duration};

use super::client_config::{ClientConfig, RequestEditor};
use super::transport::circuit_breaker::BreakerSettings;
use super::transport::{Clock, RequestExecutor};
use super::{Client, ClientError};

/// Builds a [`Client`] from a [`ClientConfig`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create an instance of [`Client`] with the information from this builder.
    pub fn build(self) -> Result<Client, ClientError> {
        Client::new(self.config)
    }

    /// Populates endpoint and credentials from the `TYPESENSE_URL` and
    /// `TYPESENSE_API_KEY` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        let server_url = std::env::var("TYPESENSE_URL")
            .map_err(|_| ClientError::ConfigError("TYPESENSE_URL is not set".to_string()))?;
        let api_key = std::env::var("TYPESENSE_API_KEY")
            .map_err(|_| ClientError::ConfigError("TYPESENSE_API_KEY is not set".to_string()))?;
        Ok(Self::default()
            .with_server_url(server_url)
            .with_api_key(api_key))
    }

    /// Set a single server URL. Mutually exclusive with [`with_nodes`](Self::with_nodes).
    pub fn with_server_url<S: Into<String>>(self, url: S) -> Self {
        ClientBuilder {
            config: ClientConfig {
                server_url: Some(url.into()),
                ..self.config
            },
        }
    }

    /// Set the member nodes rotated round-robin.
    pub fn with_nodes<I, S>(self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientBuilder {
            config: ClientConfig {
                nodes: nodes.into_iter().map(Into::into).collect(),
                ..self.config
            },
        }
    }

    /// Set the nearest node, preferred over the members while healthy.
    pub fn with_nearest_node<S: Into<String>>(self, url: S) -> Self {
        ClientBuilder {
            config: ClientConfig {
                nearest_node: Some(url.into()),
                ..self.config
            },
        }
    }

    /// Set the API key sent on every request.
    pub fn with_api_key<S: Into<String>>(self, api_key: S) -> Self {
        ClientBuilder {
            config: ClientConfig {
                api_key: api_key.into(),
                ..self.config
            },
        }
    }

    /// Set the cool-down before an unhealthy node is retried.
    pub fn with_healthcheck_interval(self, interval: Duration) -> Self {
        ClientBuilder {
            config: ClientConfig {
                healthcheck_interval: interval,
                ..self.config
            },
        }
    }

    /// Cap the attempts per logical call.
    pub fn with_num_retries(self, num_retries: usize) -> Self {
        ClientBuilder {
            config: ClientConfig {
                num_retries: Some(num_retries),
                ..self.config
            },
        }
    }

    /// Set the pause between consecutive attempts.
    pub fn with_retry_interval(self, interval: Duration) -> Self {
        ClientBuilder {
            config: ClientConfig {
                retry_interval: interval,
                ..self.config
            },
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_connection_timeout(self, timeout: Duration) -> Self {
        ClientBuilder {
            config: ClientConfig {
                connection_timeout: timeout,
                ..self.config
            },
        }
    }

    /// Tune the circuit breaker.
    pub fn with_breaker_settings(self, settings: BreakerSettings) -> Self {
        ClientBuilder {
            config: ClientConfig {
                breaker: settings,
                ..self.config
            },
        }
    }

    /// Register a pre-dispatch request editor. Editors run once per logical
    /// call, in registration order.
    pub fn with_request_editor(mut self, editor: RequestEditor) -> Self {
        self.config.editors.push(editor);
        self
    }

    /// Replace the request executor, e.g. with a scripted one in tests.
    pub fn with_executor(self, executor: Arc<dyn RequestExecutor>) -> Self {
        ClientBuilder {
            config: ClientConfig {
                executor: Some(executor),
                ..self.config
            },
        }
    }

    /// Replace the clock used for node cool-downs and breaker timers.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        ClientBuilder {
            config: ClientConfig {
                clock: Some(clock),
                ..self.config
            },
        }
    }
}
