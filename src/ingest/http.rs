//! OTLP/HTTP collection endpoints.
//!
//! Content-type sniffing between `application/x-protobuf` (prost decode)
//! and OTLP/JSON. JSON bodies default to UTF-8; a byte-order mark is
//! tolerated and non-UTF-8 sequences are replaced rather than rejected.
//! The export response is encoded in the same format as the request.

use crate::error::CollectorError;
use crate::metrics::MetricStore;
use crate::traces::TraceStore;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct IngestState {
    pub traces: Arc<TraceStore>,
    pub metrics: Arc<MetricStore>,
}

pub fn router(traces: Arc<TraceStore>, metrics: Arc<MetricStore>) -> Router {
    Router::new()
        .route("/v1/traces", post(receive_traces))
        .route("/v1/metrics", post(receive_metrics))
        .route("/v1/logs", post(receive_logs))
        .with_state(IngestState { traces, metrics })
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WireFormat {
    Protobuf,
    Json,
}

fn wire_format(headers: &HeaderMap) -> Result<WireFormat, CollectorError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let lowered = content_type.to_ascii_lowercase();
    if lowered.contains("application/x-protobuf") {
        Ok(WireFormat::Protobuf)
    } else if lowered.contains("json") {
        Ok(WireFormat::Json)
    } else {
        Err(CollectorError::UnsupportedContentType(
            content_type.to_string(),
        ))
    }
}

fn decode_request<T>(format: WireFormat, body: &Bytes) -> Result<T, CollectorError>
where
    T: Message + DeserializeOwned + Default,
{
    match format {
        WireFormat::Protobuf => Ok(T::decode(body.as_ref())?),
        WireFormat::Json => {
            let bytes = body
                .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
                .unwrap_or(body.as_ref());
            let text = String::from_utf8_lossy(bytes);
            Ok(serde_json::from_str(&text)?)
        }
    }
}

fn encode_response<T>(format: WireFormat, response: &T) -> Response
where
    T: Message + Serialize,
{
    match format {
        WireFormat::Protobuf => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-protobuf")],
            response.encode_to_vec(),
        )
            .into_response(),
        WireFormat::Json => match serde_json::to_vec(response) {
            Ok(bytes) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                bytes,
            )
                .into_response(),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        },
    }
}

async fn receive_traces(
    State(state): State<IngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CollectorError> {
    let format = wire_format(&headers)?;
    let request: ExportTraceServiceRequest = decode_request(format, &body)?;

    debug!(
        groups = request.resource_spans.len(),
        "received trace export"
    );

    let response: ExportTraceServiceResponse = state.traces.process_traces(request);
    Ok(encode_response(format, &response))
}

async fn receive_metrics(
    State(state): State<IngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CollectorError> {
    let format = wire_format(&headers)?;
    let request: ExportMetricsServiceRequest = decode_request(format, &body)?;

    debug!(
        groups = request.resource_metrics.len(),
        "received metrics export"
    );

    let response: ExportMetricsServiceResponse = state.metrics.process_metrics(request);
    Ok(encode_response(format, &response))
}

/// Accepted and dropped, mirroring the gRPC logs service.
async fn receive_logs(headers: HeaderMap, body: Bytes) -> Result<Response, CollectorError> {
    let format = wire_format(&headers)?;
    let _request: ExportLogsServiceRequest = decode_request(format, &body)?;

    let response = ExportLogsServiceResponse {
        partial_success: Some(ExportLogsPartialSuccess {
            rejected_log_records: 0,
            error_message: String::new(),
        }),
    };
    Ok(encode_response(format, &response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    fn sample_request() -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: None,
                scope_spans: vec![ScopeSpans {
                    scope: None,
                    spans: vec![Span {
                        trace_id: vec![1; 16],
                        span_id: vec![2; 8],
                        name: "op".to_string(),
                        start_time_unix_nano: 1,
                        end_time_unix_nano: 2,
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
        headers
    }

    #[test]
    fn protobuf_bodies_decode() {
        let body = Bytes::from(sample_request().encode_to_vec());
        let format = wire_format(&headers("application/x-protobuf")).unwrap();

        let decoded: ExportTraceServiceRequest = decode_request(format, &body).unwrap();
        assert_eq!(decoded, sample_request());
    }

    #[test]
    fn json_bodies_decode_with_charset_parameter() {
        let json = serde_json::to_vec(&sample_request()).unwrap();
        let body = Bytes::from(json);
        let format = wire_format(&headers("application/json; charset=utf-8")).unwrap();

        let decoded: ExportTraceServiceRequest = decode_request(format, &body).unwrap();
        assert_eq!(decoded.resource_spans.len(), 1);
    }

    #[test]
    fn json_bodies_tolerate_a_byte_order_mark() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend(serde_json::to_vec(&sample_request()).unwrap());
        let format = wire_format(&headers("application/json")).unwrap();

        let decoded: ExportTraceServiceRequest =
            decode_request(format, &Bytes::from(bytes)).unwrap();
        assert_eq!(decoded.resource_spans.len(), 1);
    }

    #[test]
    fn unknown_content_type_is_rejected() {
        let err = wire_format(&headers("text/plain")).unwrap_err();
        assert!(matches!(err, CollectorError::UnsupportedContentType(_)));
    }

    #[test]
    fn malformed_protobuf_is_an_error() {
        let body = Bytes::from_static(b"\xff\xff\xff");
        let result: Result<ExportTraceServiceRequest, _> =
            decode_request(WireFormat::Protobuf, &body);
        assert!(matches!(result, Err(CollectorError::Protobuf(_))));
    }
}
