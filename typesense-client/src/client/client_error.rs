//! Errors that can occur when talking to a Typesense cluster.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};
use thiserror::Error;

use super::transport::circuit_breaker::BreakerRejection;

/// An error that occurred while executing a client call.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A node or server URL could not be parsed.
    #[error(r#"invalid endpoint url: "{0}""#)]
    InvalidUrl(String),

    /// The client was built from an inconsistent configuration.
    #[error("invalid client configuration: {0}")]
    ConfigError(String),

    /// The request never produced an HTTP response: connect failure, DNS
    /// failure, TLS failure, or per-attempt timeout. Retriable across nodes.
    #[error("transport error: {0}")]
    TransportError(#[source] Box<dyn Error + Send + Sync>),

    /// The server answered with a 5xx status. Retriable across nodes.
    #[error("{0}")]
    ServerError(HttpPayload),

    /// The server answered with a 3xx/4xx status. Returned to the caller
    /// verbatim, never retried.
    #[error("{0}")]
    ApiError(HttpPayload),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The circuit breaker refused the call; no network traffic happened.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// A response body could not be decoded as JSON.
    #[error("invalid JSON in response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// The HTTP status carried by this error, if it wraps a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::ServerError(payload) | ClientError::ApiError(payload) => {
                Some(payload.status)
            }
            _ => None,
        }
    }

    /// Whether the dispatcher may try this failure again on another node.
    pub(crate) fn is_retriable(&self) -> bool {
        matches!(
            self,
            ClientError::TransportError(_) | ClientError::ServerError(_)
        )
    }
}

impl From<BreakerRejection> for ClientError {
    fn from(_: BreakerRejection) -> Self {
        ClientError::BreakerOpen
    }
}

/// An HTTP response surfaced as an error: the status code and the raw body
/// bytes the server sent along with it.
pub struct HttpPayload {
    /// The HTTP status code.
    pub status: u16,
    /// The body of the response.
    pub body: Vec<u8>,
}

impl HttpPayload {
    fn fmt_human_readable(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        // The body is almost always a short JSON message; when it is not
        // valid UTF-8, print the raw byte array instead.
        f.write_fmt(format_args!(
            "status: {} response: {}",
            self.status,
            String::from_utf8(self.body.clone())
                .unwrap_or_else(|_| format!("(unable to decode body as UTF-8: {:?})", self.body))
        ))
    }
}

impl Debug for HttpPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        self.fmt_human_readable(f)
    }
}

impl Display for HttpPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        self.fmt_human_readable(f)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientError, HttpPayload};

    #[test]
    fn payload_valid_utf8() {
        let payload = HttpPayload {
            status: 503,
            body: b"Service Unavailable".to_vec(),
        };
        assert_eq!(format!("{payload}"), "status: 503 response: Service Unavailable");
    }

    #[test]
    fn payload_invalid_utf8() {
        let payload = HttpPayload {
            status: 500,
            body: vec![195, 40],
        };
        assert_eq!(
            format!("{payload}"),
            "status: 500 response: (unable to decode body as UTF-8: [195, 40])"
        );
    }

    #[test]
    fn retriable_kinds() {
        assert!(ClientError::ServerError(HttpPayload {
            status: 500,
            body: vec![],
        })
        .is_retriable());
        assert!(!ClientError::ApiError(HttpPayload {
            status: 404,
            body: vec![],
        })
        .is_retriable());
        assert!(!ClientError::Cancelled.is_retriable());
        assert!(!ClientError::BreakerOpen.is_retriable());
    }

    #[test]
    fn status_accessor() {
        let err = ClientError::ApiError(HttpPayload {
            status: 409,
            body: b"{}".to_vec(),
        });
        assert_eq!(err.status(), Some(409));
        assert_eq!(ClientError::Cancelled.status(), None);
    }
}
