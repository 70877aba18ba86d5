//! Collector error type.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the transport and file layers. The stores themselves
/// never reject input, so everything here is about decoding bytes, not
/// about span/metric content.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("trace not found: {0}")]
    TraceNotFound(String),
}

impl CollectorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CollectorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CollectorError::Json(_) | CollectorError::Protobuf(_) => StatusCode::BAD_REQUEST,
            CollectorError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            CollectorError::TraceNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl axum::response::IntoResponse for CollectorError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
