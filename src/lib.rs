//! In-memory OTLP telemetry collector.
//!
//! Accepts OpenTelemetry trace and metric exports (gRPC or HTTP), keeps
//! everything in a concurrent in-memory store, and serves it back over a
//! read-only HTTP query API. Old data is trimmed by a periodic age-based
//! eviction task; nothing is persisted across restarts.

pub mod api;
pub mod config;
pub mod convert;
pub mod error;
pub mod eviction;
pub mod ingest;
pub mod metrics;
pub mod sync;
pub mod traces;

pub use config::CollectorConfig;
pub use error::CollectorError;
pub use metrics::MetricStore;
pub use traces::TraceStore;
