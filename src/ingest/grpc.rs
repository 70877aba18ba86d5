//! OTLP gRPC collection services.

use crate::metrics::MetricStore;
use crate::traces::TraceStore;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::LogsService;
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::MetricsService;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceService;
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct TraceCollector {
    traces: Arc<TraceStore>,
}

impl TraceCollector {
    pub fn new(traces: Arc<TraceStore>) -> Self {
        Self { traces }
    }
}

#[tonic::async_trait]
impl TraceService for TraceCollector {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        Ok(Response::new(
            self.traces.process_traces(request.into_inner()),
        ))
    }
}

pub struct MetricsCollector {
    metrics: Arc<MetricStore>,
}

impl MetricsCollector {
    pub fn new(metrics: Arc<MetricStore>) -> Self {
        Self { metrics }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsCollector {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        Ok(Response::new(
            self.metrics.process_metrics(request.into_inner()),
        ))
    }
}

/// Log records are accepted so exporters pointed at this collector don't
/// error, but they are not stored.
#[derive(Default)]
pub struct LogsCollector;

#[tonic::async_trait]
impl LogsService for LogsCollector {
    async fn export(
        &self,
        _request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: Some(ExportLogsPartialSuccess {
                rejected_log_records: 0,
                error_message: String::new(),
            }),
        }))
    }
}
