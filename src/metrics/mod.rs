//! Metric side of the store: resources and per-identity metric streams.

pub mod resource;
pub mod series;
pub mod store;

pub use resource::MetricResource;
pub use series::{HistogramSeries, MetricSeries};
pub use store::MetricStore;
