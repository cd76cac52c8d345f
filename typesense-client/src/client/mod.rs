//! The main client module. Contains the [`Client`] type and all associated
//! structures.

pub mod builder;
pub mod client_config;
pub mod client_error;
pub mod import;
pub mod transport;

pub use builder::ClientBuilder;
pub use client_config::{ClientConfig, RequestEditor};
pub use client_error::{ClientError, HttpPayload};
pub use import::{
    ByteStream, ExportParams, ImportAction, ImportParams, ImportResult, JsonLines,
};


use futures_util::TryStreamExt;
use reqwest::{
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
    Body, Method, Request, Response,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use import::encode_jsonl;
use transport::circuit_breaker::CircuitBreaker;
use transport::dispatch::Dispatcher;
use transport::node_pool::NodePool;
use transport::{BreakerExecutor, ReqwestExecutor, SystemClock};

static API_KEY_HEADER: HeaderName = HeaderName::from_static("x-typesense-api-key");

/// A handle to a Typesense cluster.
///
/// Cheap to clone; all clones share the node pool, circuit breaker, and the
/// underlying connection pool. Safe for concurrent use across tasks.
///
/// ```no_run
/// use typesense_client::Client;
///
/// # async fn run() -> Result<(), typesense_client::ClientError> {
/// let client = Client::builder()
///     .with_nodes(["http://ts-1:8108", "http://ts-2:8108", "http://ts-3:8108"])
///     .with_api_key("xyz")
///     .build()?;
/// let health = client.health().await?;
/// assert!(health.ok);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

struct ClientInner {
    api_key: HeaderValue,
    editors: Vec<RequestEditor>,
    dispatcher: Dispatcher,
    base: Url,
}

impl Client {
    /// Create an instance of a [`ClientBuilder`] for building a [`Client`].
    pub fn builder() -> ClientBuilder {
        Default::default()
    }

    /// Create an instance of a [`Client`] from a [`ClientConfig`].
    pub fn new(config: ClientConfig) -> Result<Client, ClientError> {
        if config.server_url.is_some() && !config.nodes.is_empty() {
            return Err(ClientError::ConfigError(
                "server_url and nodes are mutually exclusive".to_string(),
            ));
        }
        if config.server_url.is_none() && config.nodes.is_empty() && config.nearest_node.is_none()
        {
            return Err(ClientError::ConfigError(
                "no endpoint configured: set server_url, nodes, or nearest_node".to_string(),
            ));
        }

        let members: Vec<Url> = match &config.server_url {
            Some(server_url) => vec![parse_endpoint(server_url)?],
            None => config
                .nodes
                .iter()
                .map(|node| parse_endpoint(node))
                .collect::<Result<_, _>>()?,
        };
        let nearest = config
            .nearest_node
            .as_deref()
            .map(parse_endpoint)
            .transpose()?;

        let base = nearest
            .clone()
            .or_else(|| members.first().cloned())
            .expect("validated above: at least one endpoint");

        let api_key = HeaderValue::from_str(&config.api_key).map_err(|_| {
            ClientError::ConfigError("api key is not a valid header value".to_string())
        })?;

        let clock = config
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::default()));
        let num_retries = config
            .num_retries
            .unwrap_or(members.len() + usize::from(nearest.is_some()));

        let executor = match config.executor {
            Some(executor) => executor,
            None => {
                let http_client = reqwest::Client::builder()
                    .use_rustls_tls()
                    .build()
                    .map_err(|err| {
                        ClientError::ConfigError(format!("failed to build http client: {err}"))
                    })?;
                Arc::new(ReqwestExecutor::new(http_client))
            }
        };
        let breaker = Arc::new(CircuitBreaker::new(config.breaker, clock.clone()));
        let pool = NodePool::new(members, nearest, config.healthcheck_interval, clock);
        let dispatcher = Dispatcher::new(
            pool,
            BreakerExecutor::new(executor, breaker),
            num_retries,
            config.retry_interval,
            config.connection_timeout,
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                api_key,
                editors: config.editors,
                dispatcher,
                base,
            }),
        })
    }

    /// Resolves an absolute path like `/collections/books` against the
    /// configured base endpoint. The dispatcher rewrites the authority per
    /// attempt; the base only anchors the path and query.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.inner
            .base
            .join(path)
            .map_err(|_| ClientError::InvalidUrl(format!("{}{path}", self.inner.base)))
    }

    /// Executes a prepared request through the transport.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.execute_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), aborting as soon as `cancel` fires:
    /// any in-flight attempt is dropped, no further attempts are made, and
    /// [`ClientError::Cancelled`] is returned.
    pub async fn execute_cancellable(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, ClientError> {
        request
            .headers_mut()
            .insert(API_KEY_HEADER.clone(), self.inner.api_key.clone());
        for editor in &self.inner.editors {
            editor(&mut request)?;
        }
        self.inner.dispatcher.dispatch(request, cancel).await
    }

    /// GET an endpoint and decode the JSON response.
    pub async fn api_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let request = Request::new(Method::GET, self.endpoint(path)?);
        read_json(self.execute(request).await?).await
    }

    /// POST a JSON body to an endpoint and decode the JSON response.
    pub async fn api_post<T, B>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = Request::new(Method::POST, self.endpoint(path)?);
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(Body::from(serde_json::to_vec(body)?));
        read_json(self.execute(request).await?).await
    }

    /// DELETE an endpoint and decode the JSON response.
    pub async fn api_delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let request = Request::new(Method::DELETE, self.endpoint(path)?);
        read_json(self.execute(request).await?).await
    }

    /// Calls the cluster's `/health` endpoint.
    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.api_get("/health").await
    }

    /// A handle to the document operations of one collection.
    pub fn documents<S: Into<String>>(&self, collection: S) -> Documents<'_> {
        Documents {
            client: self,
            collection: collection.into(),
        }
    }
}

/// Response of the `/health` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    /// Whether the node considers itself healthy.
    pub ok: bool,
}

/// Document operations scoped to one collection.
pub struct Documents<'a> {
    client: &'a Client,
    collection: String,
}

impl Documents<'_> {
    fn path(&self, suffix: &str) -> String {
        format!("/collections/{}/documents{suffix}", self.collection)
    }

    /// Bulk-imports `records` as newline-delimited JSON and returns the
    /// per-record status objects as a lazy stream.
    ///
    /// A failed record does not fail the call; inspect each
    /// [`ImportResult`]. Only a non-2xx response or a transport failure
    /// turns into an error. The encoded body is replayed byte-for-byte on
    /// every retry.
    pub async fn import<T: Serialize>(
        &self,
        records: &[T],
        params: &ImportParams,
    ) -> Result<JsonLines<ImportResult>, ClientError> {
        let body = Body::from(encode_jsonl(records)?);
        self.import_body(body, params).await
    }

    /// Bulk-imports a pre-encoded newline-delimited JSON body, e.g. one
    /// wrapped around a file stream with [`Body::wrap_stream`].
    ///
    /// A streamed body cannot be replayed, so the transport makes a single
    /// best-effort attempt; transparent retry requires a buffered body as
    /// produced by [`import`](Self::import).
    pub async fn import_jsonl(
        &self,
        body: Body,
        params: &ImportParams,
    ) -> Result<JsonLines<ImportResult>, ClientError> {
        self.import_body(body, params).await
    }

    async fn import_body(
        &self,
        body: Body,
        params: &ImportParams,
    ) -> Result<JsonLines<ImportResult>, ClientError> {
        let mut url = self.client.endpoint(&self.path("/import"))?;
        params.apply(&mut url);
        let mut request = Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        *request.body_mut() = Some(body);
        let response = self.client.execute(request).await?;
        Ok(JsonLines::new(success_body_stream(response).await?))
    }

    /// Exports the collection's documents as newline-delimited JSON,
    /// exposing the response body stream directly.
    pub async fn export(&self, params: &ExportParams) -> Result<ByteStream, ClientError> {
        let mut url = self.client.endpoint(&self.path("/export"))?;
        params.apply(&mut url);
        let request = Request::new(Method::GET, url);
        let response = self.client.execute(request).await?;
        success_body_stream(response).await
    }

    /// Like [`export`](Self::export), parsed lazily into one
    /// [`serde_json::Value`] per document.
    pub async fn export_json_lines(
        &self,
        params: &ExportParams,
    ) -> Result<JsonLines<serde_json::Value>, ClientError> {
        Ok(JsonLines::new(self.export(params).await?))
    }
}

fn parse_endpoint(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|_| ClientError::InvalidUrl(url.to_string()))
}

// 2xx responses pass; 3xx/4xx surface as ApiError with the server's body.
// 5xx never reaches here: the breaker wrapper converted it to ServerError.
async fn check_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default();
    Err(ClientError::ApiError(HttpPayload {
        status: status.as_u16(),
        body,
    }))
}

async fn success_body_stream(response: Response) -> Result<ByteStream, ClientError> {
    let response = check_success(response).await?;
    Ok(Box::pin(response.bytes_stream().map_err(|err| {
        ClientError::TransportError(Box::new(err))
    })))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let response = check_success(response).await?;
    let body = response
        .bytes()
        .await
        .map_err(|err| ClientError::TransportError(Box::new(err)))?;
    serde_json::from_slice(&body).map_err(ClientError::from)
}
