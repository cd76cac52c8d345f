//! The newline-delimited-JSON streaming path for bulk import and export.
//!
//! Both directions stay streaming: import encodes records line by line onto
//! the request body, and the response is parsed lazily as a sequence of
//! per-record status objects, so memory stays bounded for million-row
//! payloads.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::{
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};
use url::Url;

use super::client_error::ClientError;

/// A boxed stream of raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// What the server does with each imported record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportAction {
    /// Fail records whose id already exists.
    #[default]
    Create,
    /// Create or fully replace.
    Upsert,
    /// Update an existing record; fail if absent.
    Update,
    /// Create or partially update.
    Emplace,
}

impl ImportAction {
    fn as_str(self) -> &'static str {
        match self {
            ImportAction::Create => "create",
            ImportAction::Upsert => "upsert",
            ImportAction::Update => "update",
            ImportAction::Emplace => "emplace",
        }
    }
}

/// Options for a bulk import call, rendered as query parameters.
#[derive(Debug, Clone, Default)]
pub struct ImportParams {
    /// Action applied per record.
    pub action: ImportAction,
    /// Server-side batch size between index flushes.
    pub batch_size: Option<usize>,
    /// Coercion mode for values that do not match the collection schema.
    pub dirty_values: Option<String>,
    /// Ask the server to echo each record's id in its status object.
    pub return_id: bool,
}

impl ImportParams {
    pub(crate) fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("action", self.action.as_str());
        if let Some(batch_size) = self.batch_size {
            pairs.append_pair("batch_size", &batch_size.to_string());
        }
        if let Some(dirty_values) = &self.dirty_values {
            pairs.append_pair("dirty_values", dirty_values);
        }
        if self.return_id {
            pairs.append_pair("return_id", "true");
        }
    }
}

/// Options for an export call.
#[derive(Debug, Clone, Default)]
pub struct ExportParams {
    /// Restrict the export to documents matching this filter expression.
    pub filter_by: Option<String>,
    /// Comma-separated list of fields to include.
    pub include_fields: Option<String>,
    /// Comma-separated list of fields to exclude.
    pub exclude_fields: Option<String>,
}

impl ExportParams {
    pub(crate) fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(filter_by) = &self.filter_by {
            pairs.append_pair("filter_by", filter_by);
        }
        if let Some(include_fields) = &self.include_fields {
            pairs.append_pair("include_fields", include_fields);
        }
        if let Some(exclude_fields) = &self.exclude_fields {
            pairs.append_pair("exclude_fields", exclude_fields);
        }
    }
}

/// Per-record status object from a bulk import response.
///
/// A failed record does not fail the call; it arrives here with `success:
/// false` and an error message instead.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportResult {
    /// Whether the record was indexed.
    pub success: bool,
    /// The record's id, when `return_id` was requested or the record failed.
    #[serde(default)]
    pub id: Option<String>,
    /// The server's error message for this record.
    #[serde(default)]
    pub error: Option<String>,
    /// The rejected document, echoed back on failure.
    #[serde(default)]
    pub document: Option<serde_json::Value>,
}

/// Encodes records as newline-delimited JSON, one object per line.
pub(crate) fn encode_jsonl<T: Serialize>(records: &[T]) -> Result<Vec<u8>, ClientError> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Adapts a chunked byte stream into a lazy sequence of JSON values, one per
/// newline-terminated line.
///
/// Chunk boundaries need not align with lines: the partial tail of a chunk
/// is carried until its newline arrives, and a final unterminated line is
/// flushed at end of stream. Nothing beyond the current line is buffered.
pub struct JsonLines<T> {
    stream: ByteStream,
    buf: BytesMut,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for JsonLines<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLines").finish_non_exhaustive()
    }
}

impl<T> JsonLines<T> {
    pub(crate) fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            done: false,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Stream for JsonLines<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(pos) = this.buf.iter().position(|&b| b == b'\n') {
                let line = this.buf.split_to(pos + 1);
                let line = trim_line(&line[..pos]);
                if line.is_empty() {
                    continue;
                }
                return Poll::Ready(Some(
                    serde_json::from_slice(line).map_err(ClientError::from),
                ));
            }
            if this.done {
                if this.buf.is_empty() {
                    return Poll::Ready(None);
                }
                let line = this.buf.split();
                let line = trim_line(&line);
                if line.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(
                    serde_json::from_slice(line).map_err(ClientError::from),
                ));
            }
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};
    use serde_json::{json, Value};

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk))),
        ))
    }

    async fn collect(stream: JsonLines<Value>) -> Vec<Value> {
        stream
            .map(|item| item.expect("valid JSON line"))
            .collect()
            .await
    }

    #[test]
    fn encode_jsonl_one_object_per_line() {
        let records = vec![json!({"id": "1"}), json!({"id": "2"})];
        let encoded = encode_jsonl(&records).unwrap();
        assert_eq!(encoded, b"{\"id\":\"1\"}\n{\"id\":\"2\"}\n");
    }

    #[test]
    fn import_params_render_as_query() {
        let mut url = Url::parse("http://localhost:8108/collections/books/documents/import")
            .unwrap();
        ImportParams {
            action: ImportAction::Upsert,
            batch_size: Some(40),
            dirty_values: None,
            return_id: true,
        }
        .apply(&mut url);
        assert_eq!(url.query(), Some("action=upsert&batch_size=40&return_id=true"));
    }

    #[test]
    fn export_params_render_as_query() {
        let mut url =
            Url::parse("http://localhost:8108/collections/books/documents/export").unwrap();
        ExportParams {
            filter_by: Some("num_pages:>100".to_string()),
            include_fields: Some("title".to_string()),
            exclude_fields: None,
        }
        .apply(&mut url);
        assert_eq!(
            url.query(),
            Some("filter_by=num_pages%3A%3E100&include_fields=title")
        );
    }

    #[tokio::test]
    async fn lines_split_across_chunk_boundaries() {
        let stream = byte_stream(vec![b"{\"a\":", b"1}\n{\"b\"", b":2}\n"]);
        let values = collect(JsonLines::new(stream)).await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn final_unterminated_line_is_flushed() {
        let stream = byte_stream(vec![b"{\"a\":1}\n{\"b\":2}"]);
        let values = collect(JsonLines::new(stream)).await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn blank_lines_and_crlf_are_tolerated() {
        let stream = byte_stream(vec![b"{\"a\":1}\r\n\n{\"b\":2}\n\n"]);
        let values = collect(JsonLines::new(stream)).await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn invalid_line_surfaces_json_error() {
        let stream = byte_stream(vec![b"{\"a\":1}\nnot json\n{\"b\":2}\n"]);
        let mut lines: JsonLines<Value> = JsonLines::new(stream);
        assert_eq!(lines.next().await.unwrap().unwrap(), json!({"a": 1}));
        assert!(matches!(
            lines.next().await.unwrap(),
            Err(ClientError::Json(_))
        ));
        assert_eq!(lines.next().await.unwrap().unwrap(), json!({"b": 2}));
    }

    #[tokio::test]
    async fn import_results_deserialize_lazily() {
        let stream = byte_stream(vec![
            b"{\"success\":true}\n",
            b"{\"success\":false,\"error\":\"Bad JSON.\",\"document\":\"bad\"}\n",
        ]);
        let mut lines: JsonLines<ImportResult> = JsonLines::new(stream);
        let first = lines.next().await.unwrap().unwrap();
        assert!(first.success);
        let second = lines.next().await.unwrap().unwrap();
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("Bad JSON."));
        assert!(lines.next().await.is_none());
    }
}
