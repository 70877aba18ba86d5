//! Immutable span model.

use crate::convert::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Span kind, mirroring the OTLP enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn from_proto(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

/// Span status code, mirroring the OTLP enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn from_proto(code: i32) -> Self {
        match code {
            1 => SpanStatus::Ok,
            2 => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }
}

/// A timed event attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: u64,
    pub attributes: HashMap<String, AttrValue>,
}

/// A single converted span. Immutable once constructed; the duration is
/// computed lazily and cached since nothing can change under it.
///
/// End before start is accepted as-is (the store does no validation), so
/// `duration_ms` can be negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanData {
    pub trace_id: String,
    pub id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub attributes: HashMap<String, AttrValue>,
    pub start_unix_nano: u64,
    pub start_time_ms: f64,
    pub end_unix_nano: u64,
    pub end_time_ms: f64,
    pub status: SpanStatus,
    pub status_message: Option<String>,
    pub trace_state: Option<String>,
    pub events: Vec<SpanEvent>,
    pub links: Vec<HashMap<String, AttrValue>>,
    #[serde(skip)]
    pub(crate) duration: OnceLock<f64>,
}

impl SpanData {
    /// A span with no parent id is the root of its trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn duration_ms(&self) -> f64 {
        *self
            .duration
            .get_or_init(|| self.end_time_ms - self.start_time_ms)
    }

    /// Human-readable duration used by the query API.
    pub fn duration_text(&self) -> String {
        let ms = self.duration_ms();
        if ms < 1.0 {
            format!("{}µs", (ms * 10_000.0).round() / 10.0)
        } else if ms >= 1000.0 {
            format!("{}s", (ms / 10.0).round() / 100.0)
        } else {
            format!("{}ms", (ms * 10.0).round() / 10.0)
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::convert::nanos_to_millis;

    /// Builds a span with millisecond-denominated times; everything else is
    /// defaulted.
    pub(crate) fn span(
        trace_id: &str,
        id: &str,
        parent: Option<&str>,
        name: &str,
        start_ms: u64,
        end_ms: u64,
        status: SpanStatus,
    ) -> SpanData {
        let start_unix_nano = start_ms * 1_000_000;
        let end_unix_nano = end_ms * 1_000_000;
        SpanData {
            trace_id: trace_id.to_string(),
            id: id.to_string(),
            parent_span_id: parent.map(str::to_string),
            name: name.to_string(),
            kind: SpanKind::Internal,
            attributes: HashMap::new(),
            start_unix_nano,
            start_time_ms: nanos_to_millis(start_unix_nano),
            end_unix_nano,
            end_time_ms: nanos_to_millis(end_unix_nano),
            status,
            status_message: None,
            trace_state: None,
            events: Vec::new(),
            links: Vec::new(),
            duration: OnceLock::new(),
        }
    }
}
