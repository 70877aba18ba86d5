//! Per-trace mutable aggregate.

use crate::sync::Shared;
use crate::traces::span::{SpanData, SpanStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// All spans observed for one trace id, ordered by start time, plus the
/// derived aggregates the query surface reads.
///
/// The item carries its own lock, independent from the store's map lock.
/// Lock order is strictly map-before-item; the item lock is never held
/// while acquiring the map lock or a span-name repository lock.
pub struct TraceItem {
    id: String,
    inner: Shared<TraceInner>,
    changed: watch::Sender<()>,
}

#[derive(Default)]
struct TraceInner {
    spans: Vec<Arc<SpanData>>,
    spans_by_id: HashMap<String, Arc<SpanData>>,
    root_span: Option<Arc<SpanData>>,
    start_unix_nano: Option<u64>,
    end_unix_nano: Option<u64>,
    has_error: bool,
}

impl TraceItem {
    /// Items are only created by the store, together with the first span.
    /// Instead of a back-reference to the owning store they hold a clone of
    /// its change-notification sender.
    pub(crate) fn new(id: String, changed: watch::Sender<()>) -> Self {
        Self {
            id,
            inner: Shared::new(TraceInner::default()),
            changed,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Inserts one span and notifies after the lock is released.
    pub fn add_span(&self, span: Arc<SpanData>) {
        {
            let mut inner = self.inner.write();
            inner.insert(span);
        }

        self.changed.send_replace(());
    }

    /// Inserts a batch under a single lock acquisition.
    pub fn add_spans<I>(&self, spans: I)
    where
        I: IntoIterator<Item = Arc<SpanData>>,
    {
        {
            let mut inner = self.inner.write();
            for span in spans {
                inner.insert(span);
            }
        }

        self.changed.send_replace(());
    }

    /// Point-in-time copy of the ordered span list.
    pub fn spans(&self) -> Vec<Arc<SpanData>> {
        self.inner.read().spans.clone()
    }

    pub fn span_count(&self) -> usize {
        self.inner.read().spans.len()
    }

    pub fn span(&self, id: &str) -> Option<Arc<SpanData>> {
        self.inner.read().spans_by_id.get(id).cloned()
    }

    /// The parentless span; when a trace has several, the last one inserted
    /// wins (assignment is unconditional on insert).
    pub fn root_span(&self) -> Option<Arc<SpanData>> {
        self.inner.read().root_span.clone()
    }

    /// Scalar text of a root-span attribute, for filter matching.
    pub fn root_span_attribute(&self, name: &str) -> Option<String> {
        self.root_span()?.attributes.get(name)?.as_text()
    }

    /// Minimum span start, unix nanoseconds. `None` only before the first
    /// insert, which no caller outside the store can observe.
    pub fn start_unix_nano(&self) -> Option<u64> {
        self.inner.read().start_unix_nano
    }

    pub fn end_unix_nano(&self) -> Option<u64> {
        self.inner.read().end_unix_nano
    }

    pub fn duration_ms(&self) -> f64 {
        let inner = self.inner.read();
        match (inner.start_unix_nano, inner.end_unix_nano) {
            (Some(start), Some(end)) => (end as f64 - start as f64) / 1_000_000.0,
            _ => 0.0,
        }
    }

    /// Monotonic: once any inserted span carried an error status this stays
    /// `true` for the life of the trace.
    pub fn has_error(&self) -> bool {
        self.inner.read().has_error
    }
}

impl TraceInner {
    fn insert(&mut self, span: Arc<SpanData>) {
        // Stable insertion point: after every span that starts at or before
        // the new span's start, so equal starts keep arrival order.
        let index = self
            .spans
            .partition_point(|existing| existing.start_unix_nano <= span.start_unix_nano);
        self.spans.insert(index, Arc::clone(&span));

        self.spans_by_id.insert(span.id.clone(), Arc::clone(&span));

        self.has_error = self.has_error || span.status == SpanStatus::Error;

        if span.is_root() {
            self.root_span = Some(Arc::clone(&span));
        }

        if self
            .start_unix_nano
            .map_or(true, |start| span.start_unix_nano < start)
        {
            self.start_unix_nano = Some(span.start_unix_nano);
        }

        if self
            .end_unix_nano
            .map_or(true, |end| span.end_unix_nano > end)
        {
            self.end_unix_nano = Some(span.end_unix_nano);
        }
    }
}
