//! Conversion from OTLP wire types into the internal span model.
//!
//! Everything here is pure: no store state is touched. Ids are rendered as
//! base64 text (they are opaque bytes on the wire), and the unix-nanosecond
//! timestamps are the single source of truth for time — the millisecond
//! floats are derived by one conversion path (`nanos / 1e6`), so the only
//! precision loss is the f64 mantissa at sub-microsecond scale.

use crate::traces::span::{SpanData, SpanEvent, SpanKind, SpanStatus};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::trace::v1::Span;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Internal attribute value.
///
/// Scalars map directly from the OTLP `AnyValue` oneof; arrays, key-value
/// lists and byte blobs are carried through as opaque typed values rather
/// than being flattened. An `AnyValue` with no value set maps to `Null`.
///
/// Untagged serde keeps the JSON file format plain: variant order matters
/// for deserialization (ints before doubles, arrays before bytes). The
/// representation is lossy for the opaque kinds: `Bytes` and `KvList`
/// serialize as JSON arrays, so they deserialize back as `Array`. Scalars
/// round-trip exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<AttrValue>),
    KvList(Vec<(String, AttrValue)>),
    Bytes(Vec<u8>),
}

impl AttrValue {
    /// Display form used by the query API when a scalar string is wanted.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttrValue::String(s) => Some(s.clone()),
            AttrValue::Bool(b) => Some(b.to_string()),
            AttrValue::Int(i) => Some(i.to_string()),
            AttrValue::Double(d) => Some(d.to_string()),
            _ => None,
        }
    }
}

pub fn id_to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn nanos_to_millis(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

/// Converts an OTLP `AnyValue` into an [`AttrValue`].
///
/// The prost oneof is a closed enum, so unlike the wire format there is no
/// unrecognized-variant case to fail on: conversion is total.
pub fn convert_any_value(value: Option<&AnyValue>) -> AttrValue {
    let Some(inner) = value.and_then(|v| v.value.as_ref()) else {
        return AttrValue::Null;
    };

    match inner {
        any_value::Value::StringValue(s) => AttrValue::String(s.clone()),
        any_value::Value::BoolValue(b) => AttrValue::Bool(*b),
        any_value::Value::IntValue(i) => AttrValue::Int(*i),
        any_value::Value::DoubleValue(d) => AttrValue::Double(*d),
        any_value::Value::ArrayValue(array) => AttrValue::Array(
            array
                .values
                .iter()
                .map(|v| convert_any_value(Some(v)))
                .collect(),
        ),
        any_value::Value::KvlistValue(kvlist) => AttrValue::KvList(
            kvlist
                .values
                .iter()
                .map(|kv| (kv.key.clone(), convert_any_value(kv.value.as_ref())))
                .collect(),
        ),
        any_value::Value::BytesValue(bytes) => AttrValue::Bytes(bytes.clone()),
    }
}

pub fn convert_attributes(attributes: &[KeyValue]) -> Vec<(String, AttrValue)> {
    attributes
        .iter()
        .map(|kv| (kv.key.clone(), convert_any_value(kv.value.as_ref())))
        .collect()
}

/// Builds the per-scope attribute overlay: the scope's own attributes plus
/// the synthesized `otel.library.name` / `otel.library.version` pair.
pub fn scope_attributes(scope: Option<&InstrumentationScope>) -> Vec<(String, AttrValue)> {
    let mut attributes = match scope {
        Some(scope) => convert_attributes(&scope.attributes),
        None => Vec::new(),
    };

    let (name, version) = match scope {
        Some(scope) => (scope.name.clone(), scope.version.clone()),
        None => (String::new(), String::new()),
    };

    attributes.push(("otel.library.name".to_string(), AttrValue::String(name)));
    attributes.push((
        "otel.library.version".to_string(),
        AttrValue::String(version),
    ));

    attributes
}

/// Converts an OTLP span into a [`SpanData`], merging the resource+scope
/// overlay into the span's own attributes. Malformed timing (end before
/// start) is accepted as-is.
pub fn convert_span(span: &Span, extra_attributes: &[(String, AttrValue)]) -> SpanData {
    let mut attributes: HashMap<String, AttrValue> = convert_attributes(&span.attributes)
        .into_iter()
        .collect();
    for (key, value) in extra_attributes {
        attributes.insert(key.clone(), value.clone());
    }

    let status = span.status.as_ref();

    SpanData {
        trace_id: id_to_base64(&span.trace_id),
        id: id_to_base64(&span.span_id),
        parent_span_id: if span.parent_span_id.is_empty() {
            None
        } else {
            Some(id_to_base64(&span.parent_span_id))
        },
        name: span.name.clone(),
        kind: SpanKind::from_proto(span.kind),
        attributes,
        start_unix_nano: span.start_time_unix_nano,
        start_time_ms: nanos_to_millis(span.start_time_unix_nano),
        end_unix_nano: span.end_time_unix_nano,
        end_time_ms: nanos_to_millis(span.end_time_unix_nano),
        status: status.map_or(SpanStatus::Unset, |s| SpanStatus::from_proto(s.code)),
        status_message: status.and_then(|s| {
            if s.message.is_empty() {
                None
            } else {
                Some(s.message.clone())
            }
        }),
        trace_state: if span.trace_state.is_empty() {
            None
        } else {
            Some(span.trace_state.clone())
        },
        events: span
            .events
            .iter()
            .map(|event| SpanEvent {
                name: event.name.clone(),
                time_unix_nano: event.time_unix_nano,
                attributes: convert_attributes(&event.attributes).into_iter().collect(),
            })
            .collect(),
        links: span
            .links
            .iter()
            .map(|link| convert_attributes(&link.attributes).into_iter().collect())
            .collect(),
        duration: Default::default(),
    }
}
