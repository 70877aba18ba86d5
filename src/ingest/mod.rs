//! OTLP ingestion boundary: gRPC services and HTTP endpoints that feed the
//! trace and metric stores.

pub mod grpc;
pub mod http;

pub use grpc::{LogsCollector, MetricsCollector, TraceCollector};
