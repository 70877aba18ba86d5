//! Gzip trace file export and import.
//!
//! A trace file is the gzip-compressed JSON of a [`TraceDocument`]. Import
//! also accepts uncompressed JSON; compression is detected from the gzip
//! magic bytes, not from headers.

use crate::error::CollectorError;
use crate::traces::{SpanData, TraceStore};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::info;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Serialized form of one trace: its id plus the full ordered span list.
///
/// Attribute values ride the untagged [`AttrValue`](crate::convert::AttrValue)
/// JSON encoding, so byte-blob and key-value-list attributes come back as
/// plain arrays on import. Span identity and timing round-trip exactly.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDocument {
    pub id: String,
    pub spans: Vec<Arc<SpanData>>,
}

pub fn router(traces: Arc<TraceStore>) -> Router {
    Router::new()
        .route("/api/trace-files", get(download_trace).post(upload_trace))
        .with_state(traces)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub trace_id: String,
}

/// Base64 trace ids contain `/` and `+`; keep filenames portable.
fn file_name_for(trace_id: &str) -> String {
    let safe: String = trace_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("trace-{safe}.json.gz")
}

pub fn export_trace_file(document: &TraceDocument) -> Result<Vec<u8>, CollectorError> {
    let json = serde_json::to_vec(document)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn import_trace_file(bytes: &[u8]) -> Result<TraceDocument, CollectorError> {
    let json = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        decompressed
    } else {
        bytes.to_vec()
    };

    Ok(serde_json::from_slice(&json)?)
}

async fn download_trace(
    State(traces): State<Arc<TraceStore>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, CollectorError> {
    let trace = traces
        .try_get_trace(&query.trace_id)
        .ok_or_else(|| CollectorError::TraceNotFound(query.trace_id.clone()))?;

    let document = TraceDocument {
        id: trace.id().to_string(),
        spans: trace.spans(),
    };
    let body = export_trace_file(&document)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name_for(&document.id)),
            ),
        ],
        body,
    )
        .into_response())
}

/// Re-inserts the file's spans through the normal ingestion path, so the
/// trace lands in both the store and the span-name index.
async fn upload_trace(
    State(traces): State<Arc<TraceStore>>,
    body: Bytes,
) -> Result<StatusCode, CollectorError> {
    let document = import_trace_file(&body)?;

    info!(
        trace_id = %document.id,
        spans = document.spans.len(),
        "importing trace file"
    );

    traces.add_spans(&document.id, document.spans);

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::span::testutil::span;
    use crate::traces::SpanStatus;

    fn document() -> TraceDocument {
        TraceDocument {
            id: "t1".to_string(),
            spans: vec![
                Arc::new(span("t1", "a", None, "checkout", 0, 10, SpanStatus::Ok)),
                Arc::new(span("t1", "b", Some("a"), "db", 2, 5, SpanStatus::Error)),
            ],
        }
    }

    #[test]
    fn export_produces_gzip_that_imports_back() {
        let bytes = export_trace_file(&document()).unwrap();
        assert_eq!(&bytes[..2], &GZIP_MAGIC);

        let imported = import_trace_file(&bytes).unwrap();
        assert_eq!(imported.id, "t1");
        assert_eq!(imported.spans.len(), 2);
        assert_eq!(imported.spans[0].id, "a");
        assert_eq!(imported.spans[1].status, SpanStatus::Error);
    }

    #[test]
    fn import_accepts_plain_json() {
        let json = serde_json::to_vec(&document()).unwrap();

        let imported = import_trace_file(&json).unwrap();
        assert_eq!(imported.id, "t1");
        assert_eq!(imported.spans.len(), 2);
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(
            import_trace_file(b"not json at all"),
            Err(CollectorError::Json(_))
        ));
        // Gzip magic followed by garbage fails in the decoder.
        assert!(import_trace_file(&[0x1f, 0x8b, 0x00, 0x01]).is_err());
    }

    #[test]
    fn imported_spans_reach_store_and_name_index() {
        let store = TraceStore::new();
        let doc = document();
        store.add_spans(&doc.id, doc.spans);

        let trace = store.try_get_trace("t1").unwrap();
        assert_eq!(trace.span_count(), 2);
        assert!(trace.has_error());
        assert_eq!(store.span_repository("checkout").unwrap().span_count(), 1);
        assert_eq!(store.span_repository("db").unwrap().span_count(), 1);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(file_name_for("aGVsbG8/+="), "trace-aGVsbG8___.json.gz");
    }
}
