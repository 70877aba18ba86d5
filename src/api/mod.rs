//! Read-only HTTP query surface consumed by dashboards and tooling.
//!
//! Trace ids are base64 and may contain `/`, so single-trace lookups use a
//! query-string parameter instead of a path segment.

pub mod files;

use crate::convert::nanos_to_millis;
use crate::metrics::MetricStore;
use crate::traces::{SpanData, SpanRepository, TraceItem, TraceStore};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry_proto::tonic::metrics::v1::NumberDataPoint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub traces: Arc<TraceStore>,
    pub metrics: Arc<MetricStore>,
}

pub fn router(traces: Arc<TraceStore>, metrics: Arc<MetricStore>) -> Router {
    let files = files::router(Arc::clone(&traces));

    Router::new()
        .route("/api/traces", get(list_traces))
        .route("/api/trace", get(get_trace))
        .route("/api/spans", get(list_span_groups))
        .route("/api/metrics", get(list_metrics))
        .route("/api/metrics/series", get(get_series))
        .route("/health", get(health_check))
        .with_state(ApiState { traces, metrics })
        .merge(files)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Trace list filters. Name lists are comma-separated;
/// `rootSpanAttribute` is `key=value` (or bare `key` for presence).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceFilter {
    pub min_spans: Option<usize>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub root_spans: Option<String>,
    pub exclude_root_spans: Option<String>,
    pub root_span_attribute: Option<String>,
    pub has_error: Option<bool>,
}

fn split_names(list: &Option<String>) -> Vec<&str> {
    list.as_deref()
        .map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

impl TraceFilter {
    fn matches(&self, trace: &TraceItem) -> bool {
        if let Some(min_spans) = self.min_spans {
            if trace.span_count() < min_spans {
                return false;
            }
        }

        let duration = trace.duration_ms();
        if self.min_duration_ms.is_some_and(|min| duration < min) {
            return false;
        }
        if self.max_duration_ms.is_some_and(|max| duration > max) {
            return false;
        }

        if let Some(has_error) = self.has_error {
            if trace.has_error() != has_error {
                return false;
            }
        }

        let root_name = trace.root_span().map(|s| s.name.clone());
        let allowed = split_names(&self.root_spans);
        if !allowed.is_empty()
            && !root_name
                .as_deref()
                .is_some_and(|name| allowed.contains(&name))
        {
            return false;
        }

        let denied = split_names(&self.exclude_root_spans);
        if root_name
            .as_deref()
            .is_some_and(|name| denied.contains(&name))
        {
            return false;
        }

        if let Some(wanted) = self.root_span_attribute.as_deref() {
            let matched = match wanted.split_once('=') {
                Some((key, value)) => {
                    trace.root_span_attribute(key).as_deref() == Some(value)
                }
                None => trace.root_span_attribute(wanted).is_some(),
            };
            if !matched {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub id: String,
    pub root_span_name: Option<String>,
    pub span_count: usize,
    pub start_time_ms: Option<f64>,
    pub duration_ms: f64,
    pub has_error: bool,
}

impl TraceSummary {
    fn from_item(trace: &TraceItem) -> Self {
        Self {
            id: trace.id().to_string(),
            root_span_name: trace.root_span().map(|s| s.name.clone()),
            span_count: trace.span_count(),
            start_time_ms: trace.start_unix_nano().map(nanos_to_millis),
            duration_ms: trace.duration_ms(),
            has_error: trace.has_error(),
        }
    }
}

async fn list_traces(
    State(state): State<ApiState>,
    Query(filter): Query<TraceFilter>,
) -> Json<Vec<TraceSummary>> {
    let mut summaries: Vec<TraceSummary> = state
        .traces
        .traces()
        .iter()
        .filter(|t| filter.matches(t))
        .map(|t| TraceSummary::from_item(t))
        .collect();

    // Newest first, matching how dashboards list them.
    summaries.sort_by(|a, b| {
        b.start_time_ms
            .partial_cmp(&a.start_time_ms)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Json(summaries)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceQuery {
    pub trace_id: String,
}

/// One span in a trace detail response: the span itself plus its
/// human-readable duration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanView {
    #[serde(flatten)]
    pub span: Arc<SpanData>,
    pub duration_text: String,
}

impl SpanView {
    fn from_span(span: Arc<SpanData>) -> Self {
        let duration_text = span.duration_text();
        Self {
            span,
            duration_text,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDetail {
    #[serde(flatten)]
    pub summary: TraceSummary,
    pub spans: Vec<SpanView>,
}

async fn get_trace(
    State(state): State<ApiState>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<TraceDetail>, StatusCode> {
    let trace = state
        .traces
        .try_get_trace(&query.trace_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(TraceDetail {
        summary: TraceSummary::from_item(&trace),
        spans: trace.spans().into_iter().map(SpanView::from_span).collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpanGroupFilter {
    pub min_spans: Option<usize>,
    pub has_error: Option<bool>,
    pub root_only: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanGroupSummary {
    pub name: String,
    pub span_count: usize,
    pub error_count: usize,
    pub is_root_span: bool,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub average_duration_ms: Option<f64>,
}

impl SpanGroupSummary {
    fn from_repository(repository: &SpanRepository) -> Self {
        Self {
            name: repository.name().to_string(),
            span_count: repository.span_count(),
            error_count: repository.error_count(),
            is_root_span: repository.is_root_span(),
            min_duration_ms: repository.min_duration_ms(),
            max_duration_ms: repository.max_duration_ms(),
            average_duration_ms: repository.average_duration_ms(),
        }
    }
}

async fn list_span_groups(
    State(state): State<ApiState>,
    Query(filter): Query<SpanGroupFilter>,
) -> Json<Vec<SpanGroupSummary>> {
    let mut summaries: Vec<SpanGroupSummary> = state
        .traces
        .span_repositories()
        .iter()
        .map(|r| SpanGroupSummary::from_repository(r))
        .filter(|s| {
            filter.min_spans.map_or(true, |min| s.span_count >= min)
                && filter
                    .has_error
                    .map_or(true, |wanted| (s.error_count > 0) == wanted)
                && filter
                    .root_only
                    .map_or(true, |wanted| !wanted || s.is_root_span)
        })
        .collect();

    summaries.sort_by(|a, b| a.name.cmp(&b.name));

    Json(summaries)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub kind: &'static str,
    pub name: String,
    pub scope_name: String,
    pub description: String,
    pub resource_key: String,
    pub point_count: usize,
}

async fn list_metrics(State(state): State<ApiState>) -> Json<Vec<MetricSummary>> {
    let mut summaries = Vec::new();

    for series in state.metrics.sums() {
        summaries.push(MetricSummary {
            kind: "sum",
            name: series.name().to_string(),
            scope_name: series.scope_name().to_string(),
            description: series.description().to_string(),
            resource_key: series.resource().key().to_string(),
            point_count: series.point_count(),
        });
    }
    for series in state.metrics.gauges() {
        summaries.push(MetricSummary {
            kind: "gauge",
            name: series.name().to_string(),
            scope_name: series.scope_name().to_string(),
            description: series.description().to_string(),
            resource_key: series.resource().key().to_string(),
            point_count: series.point_count(),
        });
    }
    for series in state.metrics.histograms() {
        summaries.push(MetricSummary {
            kind: "histogram",
            name: series.name().to_string(),
            scope_name: series.scope_name().to_string(),
            description: series.description().to_string(),
            resource_key: series.resource().key().to_string(),
            point_count: series.point_count(),
        });
    }

    summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.resource_key.cmp(&b.resource_key)));

    Json(summaries)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesQuery {
    pub name: String,
    pub resource_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesDetail {
    pub name: String,
    pub resource_key: String,
    pub points: Vec<NumberDataPoint>,
}

async fn get_series(
    State(state): State<ApiState>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<SeriesDetail>, StatusCode> {
    let series = state
        .metrics
        .find_series(&query.name, &query.resource_key)
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(SeriesDetail {
        name: query.name,
        resource_key: query.resource_key,
        points: series.points(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::AttrValue;
    use crate::traces::span::testutil::span;
    use crate::traces::SpanStatus;

    fn store_with_traces() -> TraceStore {
        let store = TraceStore::new();
        store.insert_span(Arc::new(span("t1", "a", None, "checkout", 0, 100, SpanStatus::Error)));
        store.insert_span(Arc::new(span("t2", "b", None, "login", 0, 5, SpanStatus::Ok)));
        store.insert_span(Arc::new(span("t2", "c", Some("b"), "db", 1, 2, SpanStatus::Ok)));
        store
    }

    fn find<'a>(traces: &'a [Arc<TraceItem>], id: &str) -> &'a Arc<TraceItem> {
        traces.iter().find(|t| t.id() == id).unwrap()
    }

    #[test]
    fn filter_by_error_flag() {
        let store = store_with_traces();
        let traces = store.traces();

        let filter = TraceFilter {
            has_error: Some(true),
            ..Default::default()
        };

        assert!(filter.matches(find(&traces, "t1")));
        assert!(!filter.matches(find(&traces, "t2")));
    }

    #[test]
    fn filter_by_span_count_and_duration() {
        let store = store_with_traces();
        let traces = store.traces();

        let filter = TraceFilter {
            min_spans: Some(2),
            max_duration_ms: Some(50.0),
            ..Default::default()
        };

        assert!(!filter.matches(find(&traces, "t1")));
        assert!(filter.matches(find(&traces, "t2")));
    }

    #[test]
    fn filter_by_root_name_lists() {
        let store = store_with_traces();
        let traces = store.traces();

        let allow = TraceFilter {
            root_spans: Some("checkout, signup".to_string()),
            ..Default::default()
        };
        assert!(allow.matches(find(&traces, "t1")));
        assert!(!allow.matches(find(&traces, "t2")));

        let deny = TraceFilter {
            exclude_root_spans: Some("checkout".to_string()),
            ..Default::default()
        };
        assert!(!deny.matches(find(&traces, "t1")));
        assert!(deny.matches(find(&traces, "t2")));
    }

    #[test]
    fn filter_by_root_span_attribute() {
        let store = TraceStore::new();
        let mut root = span("t1", "a", None, "checkout", 0, 100, SpanStatus::Ok);
        root.attributes.insert(
            "http.route".to_string(),
            AttrValue::String("/checkout".to_string()),
        );
        store.insert_span(Arc::new(root));
        store.insert_span(Arc::new(span("t2", "b", None, "login", 0, 5, SpanStatus::Ok)));
        let traces = store.traces();

        let by_value = TraceFilter {
            root_span_attribute: Some("http.route=/checkout".to_string()),
            ..Default::default()
        };
        assert!(by_value.matches(find(&traces, "t1")));
        assert!(!by_value.matches(find(&traces, "t2")));

        let by_presence = TraceFilter {
            root_span_attribute: Some("http.route".to_string()),
            ..Default::default()
        };
        assert!(by_presence.matches(find(&traces, "t1")));
        assert!(!by_presence.matches(find(&traces, "t2")));

        let wrong_value = TraceFilter {
            root_span_attribute: Some("http.route=/login".to_string()),
            ..Default::default()
        };
        assert!(!wrong_value.matches(find(&traces, "t1")));
    }

    #[test]
    fn span_payloads_carry_duration_text() {
        let store = store_with_traces();
        let trace = store.try_get_trace("t2").unwrap();

        let views: Vec<SpanView> = trace
            .spans()
            .into_iter()
            .map(SpanView::from_span)
            .collect();
        let json = serde_json::to_value(&views[0]).unwrap();

        assert_eq!(json["durationText"], "5ms");
        // The span's own fields flatten alongside it.
        assert_eq!(json["name"], "login");
    }

    #[test]
    fn summary_carries_derived_fields() {
        let store = store_with_traces();
        let traces = store.traces();

        let summary = TraceSummary::from_item(find(&traces, "t2"));
        assert_eq!(summary.root_span_name.as_deref(), Some("login"));
        assert_eq!(summary.span_count, 2);
        assert_eq!(summary.duration_ms, 5.0);
        assert!(!summary.has_error);
    }
}
