//! Concurrent metric store: resources, sum/gauge/histogram streams.

use crate::metrics::resource::{MetricResource, RESERVED_KEY_PREFIX};
use crate::metrics::series::{HistogramSeries, MetricSeries};
use crate::sync::Shared;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::any_value;
use opentelemetry_proto::tonic::metrics::v1::metric;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Owns deduplicated resources and, per (resource, scope, metric name)
/// identity, one stream per metric kind.
///
/// Each collection has its own lock; they have no cross-dependency, so
/// locks here may be taken in any order relative to each other (but never
/// while holding a trace-item lock).
pub struct MetricStore {
    resources: Shared<Vec<Arc<MetricResource>>>,
    sums: Shared<Vec<Arc<MetricSeries>>>,
    gauges: Shared<Vec<Arc<MetricSeries>>>,
    histograms: Shared<Vec<Arc<HistogramSeries>>>,
    changed: watch::Sender<()>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(());
        Self {
            resources: Shared::new(Vec::new()),
            sums: Shared::new(Vec::new()),
            gauges: Shared::new(Vec::new()),
            histograms: Shared::new(Vec::new()),
            changed,
        }
    }

    /// Best-effort, coalescing change notification.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.changed.subscribe()
    }

    pub fn resources(&self) -> Vec<Arc<MetricResource>> {
        self.resources.read().clone()
    }

    pub fn sums(&self) -> Vec<Arc<MetricSeries>> {
        self.sums.read().clone()
    }

    pub fn gauges(&self) -> Vec<Arc<MetricSeries>> {
        self.gauges.read().clone()
    }

    pub fn histograms(&self) -> Vec<Arc<HistogramSeries>> {
        self.histograms.read().clone()
    }

    /// Sum or gauge stream lookup by (metric name, resource key).
    pub fn find_series(&self, name: &str, resource_key: &str) -> Option<Arc<MetricSeries>> {
        self.sums
            .read()
            .iter()
            .chain(self.gauges.read().iter())
            .find(|s| s.name() == name && s.resource().key() == resource_key)
            .cloned()
    }

    /// Deduplicated resource for the attribute set; exactly one instance
    /// survives per distinct set under concurrent callers.
    pub fn get_resource(&self, attributes: BTreeMap<String, String>) -> Arc<MetricResource> {
        self.resources.get_or_create(
            |list| list.iter().find(|r| r.matches(&attributes)).cloned(),
            |list| {
                let resource = Arc::new(MetricResource::new(attributes.clone()));
                list.push(Arc::clone(&resource));
                self.changed.send_replace(());
                resource
            },
        )
    }

    pub fn get_sum(
        &self,
        resource: &Arc<MetricResource>,
        scope_name: &str,
        name: &str,
        description: &str,
    ) -> Arc<MetricSeries> {
        Self::get_series(&self.sums, &self.changed, resource, scope_name, name, description)
    }

    pub fn get_gauge(
        &self,
        resource: &Arc<MetricResource>,
        scope_name: &str,
        name: &str,
        description: &str,
    ) -> Arc<MetricSeries> {
        Self::get_series(&self.gauges, &self.changed, resource, scope_name, name, description)
    }

    fn get_series(
        collection: &Shared<Vec<Arc<MetricSeries>>>,
        changed: &watch::Sender<()>,
        resource: &Arc<MetricResource>,
        scope_name: &str,
        name: &str,
        description: &str,
    ) -> Arc<MetricSeries> {
        collection.get_or_create(
            |list| {
                list.iter()
                    .find(|s| {
                        Arc::ptr_eq(s.resource(), resource)
                            && s.scope_name() == scope_name
                            && s.name() == name
                    })
                    .cloned()
            },
            |list| {
                let series = Arc::new(MetricSeries::new(
                    Arc::clone(resource),
                    scope_name.to_string(),
                    name.to_string(),
                    description.to_string(),
                ));
                list.push(Arc::clone(&series));
                changed.send_replace(());
                series
            },
        )
    }

    pub fn get_histograms(
        &self,
        resource: &Arc<MetricResource>,
        scope_name: &str,
        name: &str,
        description: &str,
    ) -> Arc<HistogramSeries> {
        self.histograms.get_or_create(
            |list| {
                list.iter()
                    .find(|s| {
                        Arc::ptr_eq(s.resource(), resource)
                            && s.scope_name() == scope_name
                            && s.name() == name
                    })
                    .cloned()
            },
            |list| {
                let series = Arc::new(HistogramSeries::new(
                    Arc::clone(resource),
                    scope_name.to_string(),
                    name.to_string(),
                    description.to_string(),
                ));
                list.push(Arc::clone(&series));
                self.changed.send_replace(());
                series
            },
        )
    }

    /// Ingests one OTLP metrics export request.
    ///
    /// Gauge and Sum points append; Histogram points upsert by attribute
    /// signature plus start time; ExponentialHistogram and Summary data are
    /// accepted but dropped. Never rejects anything.
    pub fn process_metrics(
        &self,
        request: ExportMetricsServiceRequest,
    ) -> ExportMetricsServiceResponse {
        for resource_metrics in request.resource_metrics {
            let attributes: BTreeMap<String, String> = resource_metrics
                .resource
                .as_ref()
                .map(|r| {
                    r.attributes
                        .iter()
                        .filter(|kv| !kv.key.to_ascii_lowercase().starts_with(RESERVED_KEY_PREFIX))
                        .filter_map(|kv| match kv.value.as_ref().and_then(|v| v.value.as_ref()) {
                            Some(any_value::Value::StringValue(s)) => {
                                Some((kv.key.clone(), s.clone()))
                            }
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let resource = self.get_resource(attributes);

            for scope_metrics in resource_metrics.scope_metrics {
                let scope_name = scope_metrics
                    .scope
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_default();

                for m in scope_metrics.metrics {
                    match m.data {
                        Some(metric::Data::Gauge(gauge)) => {
                            self.get_gauge(&resource, &scope_name, &m.name, &m.description)
                                .add_points(gauge.data_points);
                            self.changed.send_replace(());
                        }
                        Some(metric::Data::Sum(sum)) => {
                            self.get_sum(&resource, &scope_name, &m.name, &m.description)
                                .add_points(sum.data_points);
                            self.changed.send_replace(());
                        }
                        Some(metric::Data::Histogram(histogram)) => {
                            self.get_histograms(&resource, &scope_name, &m.name, &m.description)
                                .add_points(histogram.data_points);
                            self.changed.send_replace(());
                        }
                        // Accepted but not stored.
                        Some(metric::Data::ExponentialHistogram(_))
                        | Some(metric::Data::Summary(_))
                        | None => {}
                    }
                }
            }
        }

        ExportMetricsServiceResponse {
            partial_success: Some(ExportMetricsPartialSuccess {
                rejected_data_points: 0,
                error_message: String::new(),
            }),
        }
    }

    /// Drops Sum and Gauge points older than the cutoff. Histogram streams
    /// are left alone. Notifies once if anything changed.
    pub fn evict_older_than(&self, cutoff_unix_nano: u64) {
        let mut changed = false;

        {
            let sums = self.sums.write();
            for series in sums.iter() {
                changed |= series.remove_older_than(cutoff_unix_nano);
            }
        }

        {
            let gauges = self.gauges.write();
            for series in gauges.iter() {
                changed |= series.remove_older_than(cutoff_unix_nano);
            }
        }

        if changed {
            self.changed.send_replace(());
        }
    }
}
