//! Per-span-name aggregate across traces.

use crate::sync::Shared;
use crate::traces::span::{SpanData, SpanStatus};
use parking_lot::RwLockUpgradableReadGuard;
use std::sync::Arc;

/// Groups every span sharing one name, across all traces, with derived
/// duration statistics. Created on the first span with the name; the store
/// drops it once eviction removes its last member.
pub struct SpanRepository {
    name: String,
    inner: Shared<SpanGroup>,
}

#[derive(Default)]
struct SpanGroup {
    spans: Vec<Arc<SpanData>>,
    error_spans: Vec<Arc<SpanData>>,
    min_duration_ms: Option<f64>,
    max_duration_ms: Option<f64>,
    // Cached until the next membership change.
    average_duration_ms: Option<f64>,
}

impl SpanRepository {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            inner: Shared::new(SpanGroup::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spans(&self) -> Vec<Arc<SpanData>> {
        self.inner.read().spans.clone()
    }

    pub fn span_count(&self) -> usize {
        self.inner.read().spans.len()
    }

    pub fn error_spans(&self) -> Vec<Arc<SpanData>> {
        self.inner.read().error_spans.clone()
    }

    pub fn error_count(&self) -> usize {
        self.inner.read().error_spans.len()
    }

    /// True when any member span is the root of its trace.
    pub fn is_root_span(&self) -> bool {
        self.inner.read().spans.iter().any(|s| s.is_root())
    }

    pub fn min_duration_ms(&self) -> Option<f64> {
        self.inner.read().min_duration_ms
    }

    pub fn max_duration_ms(&self) -> Option<f64> {
        self.inner.read().max_duration_ms
    }

    /// Lazily computed mean duration, cached until the next add/remove.
    ///
    /// Computed under the upgradeable-read/write double-check so concurrent
    /// readers do not redundantly recompute.
    pub fn average_duration_ms(&self) -> Option<f64> {
        let guard = self.inner.upgradable_read();

        if let Some(average) = guard.average_duration_ms {
            return Some(average);
        }

        if guard.spans.is_empty() {
            return None;
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);

        if guard.average_duration_ms.is_none() {
            let sum: f64 = guard.spans.iter().map(|s| s.duration_ms()).sum();
            guard.average_duration_ms = Some(sum / guard.spans.len() as f64);
        }

        guard.average_duration_ms
    }

    pub(crate) fn add_span(&self, span: Arc<SpanData>) {
        let mut group = self.inner.write();

        let duration = span.duration_ms();

        if span.status == SpanStatus::Error {
            group.error_spans.push(Arc::clone(&span));
        }
        group.spans.push(span);

        if group.min_duration_ms.map_or(true, |min| duration < min) {
            group.min_duration_ms = Some(duration);
        }
        if group.max_duration_ms.map_or(true, |max| duration > max) {
            group.max_duration_ms = Some(duration);
        }

        group.average_duration_ms = None;
    }

    /// Removes a member (called by the store during trace removal).
    ///
    /// If the removed duration was the cached min or max, the remaining
    /// spans are rescanned; the O(n) pass is fine at eviction volumes.
    pub(crate) fn remove_span(&self, span: &Arc<SpanData>) {
        let mut group = self.inner.write();

        group.spans.retain(|s| !Arc::ptr_eq(s, span));
        if span.status == SpanStatus::Error {
            group.error_spans.retain(|s| !Arc::ptr_eq(s, span));
        }

        let duration = span.duration_ms();

        if group.spans.is_empty() {
            group.min_duration_ms = None;
            group.max_duration_ms = None;
        } else {
            if group.min_duration_ms == Some(duration) {
                group.min_duration_ms = group
                    .spans
                    .iter()
                    .map(|s| s.duration_ms())
                    .fold(None, |min, d| match min {
                        Some(m) if m <= d => Some(m),
                        _ => Some(d),
                    });
            }
            if group.max_duration_ms == Some(duration) {
                group.max_duration_ms = group
                    .spans
                    .iter()
                    .map(|s| s.duration_ms())
                    .fold(None, |max, d| match max {
                        Some(m) if m >= d => Some(m),
                        _ => Some(d),
                    });
            }
        }

        group.average_duration_ms = None;
    }
}
