//! `typesense-client` is a client library for the
//! [Typesense](https://typesense.org) search engine, built around a
//! resilient multi-endpoint HTTP transport.
//!
//! ## Overview
//! Every call is spread across a set of equivalent replica nodes, with an
//! optional "nearest" replica preferred while it is healthy. Nodes that
//! produce transport errors or 5xx responses are taken out of rotation and
//! probed back in after a cool-down. A single logical call is retried a
//! bounded number of times across nodes, and the whole executor sits behind
//! a process-wide circuit breaker that short-circuits calls when the
//! backend is struggling.
//!
//! Bulk import and export use newline-delimited JSON and stay streaming in
//! both directions, so memory stays bounded even for very large payloads.
//!
//! ## Example
//! ```no_run
//! use typesense_client::{Client, ImportParams};
//! use futures_util::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), typesense_client::ClientError> {
//!     let client = Client::builder()
//!         .with_nearest_node("http://ts-0:8108")
//!         .with_nodes(["http://ts-1:8108", "http://ts-2:8108"])
//!         .with_api_key("xyz")
//!         .build()?;
//!
//!     let books = [
//!         json!({"id": "1", "title": "The Hitchhiker's Guide to the Galaxy"}),
//!         json!({"id": "2", "title": "The Restaurant at the End of the Universe"}),
//!     ];
//!     let mut statuses = client
//!         .documents("books")
//!         .import(&books, &ImportParams::default())
//!         .await?;
//!     while let Some(status) = statuses.next().await {
//!         let status = status?;
//!         if !status.success {
//!             eprintln!("record rejected: {:?}", status.error);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]

pub mod client;

#[doc(inline)]
pub use client::{
    client_error, Client, ClientBuilder, ClientConfig, ClientError, Documents, ExportParams,
    HealthStatus, HttpPayload, ImportAction, ImportParams, ImportResult, JsonLines,
    RequestEditor,
};
#[doc(inline)]
pub use client::transport::circuit_breaker::{BreakerSettings, BreakerState, Counts};
#[doc(inline)]
pub use client::transport::{Clock, RequestExecutor, ReqwestExecutor, SystemClock};
