//! Concurrent trace store: trace map, span-name index, eviction.

use crate::convert::{convert_attributes, convert_span, scope_attributes};
use crate::sync::Shared;
use crate::traces::item::TraceItem;
use crate::traces::repository::SpanRepository;
use crate::traces::span::SpanData;
use arc_swap::ArcSwap;
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Owns every [`TraceItem`] plus the secondary index of
/// [`SpanRepository`]s keyed by span name.
///
/// Two-level locking: the map lock here guards only structural mutation of
/// the maps, each item and repository carries its own lock. The map lock is
/// always acquired before an item lock, never the reverse. Span-name
/// repositories are appended to only after the item lock is released, so
/// ingestion critical sections stay short.
pub struct TraceStore {
    traces: Shared<HashMap<String, Arc<TraceItem>>>,
    spans_by_name: Shared<HashMap<String, Arc<SpanRepository>>>,
    // Refreshed on every structural map change, never during reads.
    snapshot: ArcSwap<Vec<Arc<TraceItem>>>,
    changed: watch::Sender<()>,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceStore {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(());
        Self {
            traces: Shared::new(HashMap::new()),
            spans_by_name: Shared::new(HashMap::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
            changed,
        }
    }

    /// Change notification: best-effort and coalescing, with no ordering
    /// guarantee across concurrent writers. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }

    /// Point-in-time snapshot of all traces.
    pub fn traces(&self) -> Arc<Vec<Arc<TraceItem>>> {
        self.snapshot.load_full()
    }

    pub fn try_get_trace(&self, id: &str) -> Option<Arc<TraceItem>> {
        self.traces.read().get(id).cloned()
    }

    /// Idempotent creation: concurrent callers with the same id all observe
    /// the single surviving item.
    pub fn get_or_add_trace(&self, id: &str) -> Arc<TraceItem> {
        self.traces.get_or_create(
            |map| map.get(id).cloned(),
            |map| {
                let item = Arc::new(TraceItem::new(id.to_string(), self.changed.clone()));
                map.insert(id.to_string(), Arc::clone(&item));
                self.snapshot.store(Arc::new(map.values().cloned().collect()));
                item
            },
        )
    }

    pub fn span_repositories(&self) -> Vec<Arc<SpanRepository>> {
        self.spans_by_name.read().values().cloned().collect()
    }

    pub fn span_repository(&self, name: &str) -> Option<Arc<SpanRepository>> {
        self.spans_by_name.read().get(name).cloned()
    }

    fn repository_for(&self, name: &str) -> Arc<SpanRepository> {
        self.spans_by_name.get_or_create(
            |map| map.get(name).cloned(),
            |map| {
                let repository = Arc::new(SpanRepository::new(name.to_string()));
                map.insert(name.to_string(), Arc::clone(&repository));
                repository
            },
        )
    }

    /// Inserts one converted span into its trace and the span-name index.
    /// The name index append happens after the item lock is released.
    pub fn insert_span(&self, span: Arc<SpanData>) {
        let trace = self.get_or_add_trace(&span.trace_id);
        trace.add_span(Arc::clone(&span));

        self.repository_for(&span.name).add_span(span);
    }

    /// Batch insert for one trace id, used by file import. Spans land in the
    /// item under one lock acquisition and are then indexed by name exactly
    /// as ingestion does.
    pub fn add_spans(&self, trace_id: &str, spans: Vec<Arc<SpanData>>) {
        let trace = self.get_or_add_trace(trace_id);
        trace.add_spans(spans.iter().cloned());

        for span in spans {
            self.repository_for(&span.name).add_span(span);
        }
    }

    /// Ingests one OTLP export request. Never rejects anything: malformed
    /// timing, duplicate ids and orphaned parents are stored as-is.
    pub fn process_traces(&self, request: ExportTraceServiceRequest) -> ExportTraceServiceResponse {
        for resource_spans in &request.resource_spans {
            let resource_attributes = resource_spans
                .resource
                .as_ref()
                .map(|r| convert_attributes(&r.attributes))
                .unwrap_or_default();

            for scope_spans in &resource_spans.scope_spans {
                let mut overlay = resource_attributes.clone();
                overlay.extend(scope_attributes(scope_spans.scope.as_ref()));

                for span in &scope_spans.spans {
                    self.insert_span(Arc::new(convert_span(span, &overlay)));
                }
            }
        }

        ExportTraceServiceResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 0,
                error_message: String::new(),
            }),
        }
    }

    /// Removes one trace and cascades into the span-name index, dropping
    /// repositories that become empty.
    pub fn remove_trace(&self, trace: &Arc<TraceItem>) {
        {
            let mut map = self.traces.write();

            if map.remove(trace.id()).is_none() {
                return;
            }

            self.remove_trace_spans(trace);

            self.snapshot.store(Arc::new(map.values().cloned().collect()));
        }

        self.changed.send_replace(());
    }

    /// Removes every trace whose start precedes `cutoff_unix_nano`,
    /// cascading into the span-name index. Notifies once if anything
    /// changed. Returns the number of traces removed.
    pub fn evict_older_than(&self, cutoff_unix_nano: u64) -> usize {
        let removed = {
            let mut map = self.traces.write();

            let old: Vec<Arc<TraceItem>> = map
                .values()
                .filter(|t| t.start_unix_nano().is_some_and(|start| start < cutoff_unix_nano))
                .cloned()
                .collect();

            if old.is_empty() {
                return 0;
            }

            for trace in &old {
                map.remove(trace.id());
                self.remove_trace_spans(trace);
            }

            self.snapshot.store(Arc::new(map.values().cloned().collect()));

            old.len()
        };

        debug!(removed, "evicted traces past max age");
        self.changed.send_replace(());

        removed
    }

    fn remove_trace_spans(&self, trace: &Arc<TraceItem>) {
        let mut repositories = self.spans_by_name.write();

        for span in trace.spans() {
            let Some(repository) = repositories.get(&span.name) else {
                continue;
            };

            repository.remove_span(&span);

            if repository.span_count() == 0 {
                repositories.remove(&span.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traces::span::testutil::span;
    use crate::traces::span::SpanStatus;
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn arc(span: SpanData) -> Arc<SpanData> {
        Arc::new(span)
    }

    #[test]
    fn concurrent_get_or_add_yields_one_instance() {
        let store = Arc::new(TraceStore::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.get_or_add_trace("shared")
                })
            })
            .collect();

        let items: Vec<Arc<TraceItem>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for item in &items[1..] {
            assert!(Arc::ptr_eq(&items[0], item));
        }
        assert_eq!(store.traces().len(), 1);
    }

    #[test]
    fn insert_updates_trace_and_name_index() {
        let store = TraceStore::new();
        store.insert_span(arc(span("t1", "a", None, "op", 0, 10, SpanStatus::Unset)));
        store.insert_span(arc(span("t1", "b", Some("a"), "op", 1, 2, SpanStatus::Unset)));
        store.insert_span(arc(span("t2", "c", None, "other", 0, 5, SpanStatus::Unset)));

        assert_eq!(store.traces().len(), 2);
        assert_eq!(store.try_get_trace("t1").unwrap().span_count(), 2);
        assert_eq!(store.span_repository("op").unwrap().span_count(), 2);
        assert_eq!(store.span_repository("other").unwrap().span_count(), 1);
    }

    #[test]
    fn remove_trace_cascades_into_name_index() {
        let store = TraceStore::new();
        store.insert_span(arc(span("t1", "a", None, "op", 0, 10, SpanStatus::Unset)));
        store.insert_span(arc(span("t2", "b", None, "op", 0, 10, SpanStatus::Unset)));

        let t1 = store.try_get_trace("t1").unwrap();
        store.remove_trace(&t1);

        assert!(store.try_get_trace("t1").is_none());
        assert_eq!(store.span_repository("op").unwrap().span_count(), 1);

        let t2 = store.try_get_trace("t2").unwrap();
        store.remove_trace(&t2);
        assert!(store.span_repository("op").is_none());
    }

    #[test]
    fn eviction_removes_traces_older_than_the_cutoff() {
        let store = TraceStore::new();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let two_minutes_ago = (now - Duration::from_secs(120).as_nanos() as u64) / 1_000_000;
        let fresh = now / 1_000_000;

        store.insert_span(arc(span(
            "old",
            "a",
            None,
            "op",
            two_minutes_ago,
            two_minutes_ago + 10,
            SpanStatus::Unset,
        )));
        store.insert_span(arc(span(
            "new", "b", None, "op", fresh, fresh, SpanStatus::Unset,
        )));

        let cutoff = now - Duration::from_secs(60).as_nanos() as u64;
        assert_eq!(store.evict_older_than(cutoff), 1);

        assert!(store.try_get_trace("old").is_none());
        assert!(store.try_get_trace("new").is_some());
        // The old trace's span is gone from the name index too.
        assert_eq!(store.span_repository("op").unwrap().span_count(), 1);

        // Nothing left to evict.
        assert_eq!(store.evict_older_than(cutoff), 0);
    }

    #[test]
    fn snapshot_reflects_structural_changes() {
        let store = TraceStore::new();
        let before = store.traces();
        assert!(before.is_empty());

        store.insert_span(arc(span("t", "a", None, "op", 0, 1, SpanStatus::Unset)));

        assert!(before.is_empty());
        assert_eq!(store.traces().len(), 1);
    }

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    #[test]
    fn process_traces_converts_and_reports_zero_rejects() {
        let store = TraceStore::new();

        let request = ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![kv("service.name", "checkout")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "http".to_string(),
                        version: "0.1".to_string(),
                        ..Default::default()
                    }),
                    spans: vec![Span {
                        trace_id: vec![7; 16],
                        span_id: vec![8; 8],
                        name: "GET /".to_string(),
                        start_time_unix_nano: 1_000_000,
                        end_time_unix_nano: 2_000_000,
                        ..Default::default()
                    }],
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        };

        let response = store.process_traces(request);
        let partial = response.partial_success.unwrap();
        assert_eq!(partial.rejected_spans, 0);
        assert!(partial.error_message.is_empty());

        let traces = store.traces();
        assert_eq!(traces.len(), 1);
        let spans = traces[0].spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].attributes.get("service.name").and_then(|v| v.as_text()),
            Some("checkout".to_string())
        );
        assert_eq!(
            spans[0]
                .attributes
                .get("otel.library.name")
                .and_then(|v| v.as_text()),
            Some("http".to_string())
        );
    }
}
