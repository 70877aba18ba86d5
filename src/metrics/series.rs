//! Metric stream types: raw number-point series and histogram series.

use crate::metrics::resource::MetricResource;
use opentelemetry_proto::tonic::common::v1::{any_value, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{HistogramDataPoint, NumberDataPoint};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One Sum or Gauge stream for a (resource, scope, metric name) identity.
/// Data points are appended as they arrive; duplicates are allowed.
pub struct MetricSeries {
    resource: Arc<MetricResource>,
    scope_name: String,
    name: String,
    description: String,
    points: Mutex<Vec<NumberDataPoint>>,
}

impl MetricSeries {
    pub(crate) fn new(
        resource: Arc<MetricResource>,
        scope_name: String,
        name: String,
        description: String,
    ) -> Self {
        Self {
            resource,
            scope_name,
            name,
            description,
            points: Mutex::new(Vec::new()),
        }
    }

    pub fn resource(&self) -> &Arc<MetricResource> {
        &self.resource
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn points(&self) -> Vec<NumberDataPoint> {
        self.points.lock().clone()
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().len()
    }

    pub(crate) fn add_points<I>(&self, points: I)
    where
        I: IntoIterator<Item = NumberDataPoint>,
    {
        self.points.lock().extend(points);
    }

    /// Drops points older than the cutoff; returns whether anything was
    /// removed.
    pub(crate) fn remove_older_than(&self, cutoff_unix_nano: u64) -> bool {
        let mut points = self.points.lock();
        let before = points.len();
        points.retain(|p| p.time_unix_nano >= cutoff_unix_nano);
        points.len() != before
    }
}

/// One Histogram stream. Points are keyed by (attribute signature,
/// start time), so a repeated signature+start-time replaces the stored
/// point instead of accumulating a duplicate.
pub struct HistogramSeries {
    resource: Arc<MetricResource>,
    scope_name: String,
    name: String,
    description: String,
    points: Mutex<HashMap<String, BTreeMap<u64, HistogramDataPoint>>>,
}

impl HistogramSeries {
    pub(crate) fn new(
        resource: Arc<MetricResource>,
        scope_name: String,
        name: String,
        description: String,
    ) -> Self {
        Self {
            resource,
            scope_name,
            name,
            description,
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn resource(&self) -> &Arc<MetricResource> {
        &self.resource
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Snapshot keyed by attribute signature, then start time.
    pub fn histograms(&self) -> HashMap<String, BTreeMap<u64, HistogramDataPoint>> {
        self.points.lock().clone()
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().values().map(|by_start| by_start.len()).sum()
    }

    pub(crate) fn add_points<I>(&self, points: I)
    where
        I: IntoIterator<Item = HistogramDataPoint>,
    {
        let mut map = self.points.lock();

        for point in points {
            let signature = attribute_signature(&point.attributes);
            map.entry(signature)
                .or_default()
                .insert(point.start_time_unix_nano, point);
        }
    }
}

/// Canonical signature of a data point's attribute set: keys sorted,
/// rendered as `key:value` joined by `;`. Only string values contribute
/// text; other value kinds render empty, matching identity by key presence.
pub(crate) fn attribute_signature(attributes: &[KeyValue]) -> String {
    let mut parts: Vec<String> = attributes
        .iter()
        .map(|kv| {
            let text = match kv.value.as_ref().and_then(|v| v.value.as_ref()) {
                Some(any_value::Value::StringValue(s)) => s.as_str(),
                _ => "",
            };
            format!("{}:{}", kv.key, text)
        })
        .collect();
    parts.sort_unstable();
    parts.join(";")
}
