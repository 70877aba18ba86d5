use anyhow::Context;
use axum::http::Request;
use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::LogsServiceServer;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::MetricsServiceServer;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;
use otelscope::api;
use otelscope::eviction;
use otelscope::ingest::http as ingest_http;
use otelscope::ingest::{LogsCollector, MetricsCollector, TraceCollector};
use otelscope::{CollectorConfig, MetricStore, TraceStore};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::field::{self, Empty};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = CollectorConfig::path();
    let config = CollectorConfig::load(&config_path)
        .with_context(|| format!("reading config from {}", config_path.display()))?;
    info!(config = ?config, path = %config_path.display(), "starting collector");

    let traces = Arc::new(TraceStore::new());
    let metrics = Arc::new(MetricStore::new());

    let eviction_handle = eviction::spawn(
        Arc::clone(&traces),
        Arc::clone(&metrics),
        config_path.clone(),
    );

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    let grpc = tonic::transport::Server::builder()
        .add_service(TraceServiceServer::new(TraceCollector::new(Arc::clone(
            &traces,
        ))))
        .add_service(MetricsServiceServer::new(MetricsCollector::new(
            Arc::clone(&metrics),
        )))
        .add_service(LogsServiceServer::new(LogsCollector))
        .serve(grpc_addr);
    info!("OTLP/gRPC listening on {}", grpc_addr);

    let ingest_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let ingest_app =
        ingest_http::router(Arc::clone(&traces), Arc::clone(&metrics)).layer(http_trace_layer());
    let ingest_listener = tokio::net::TcpListener::bind(ingest_addr)
        .await
        .with_context(|| format!("binding OTLP/HTTP listener on {ingest_addr}"))?;
    info!("OTLP/HTTP listening on {}", ingest_addr);

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let api_app = api::router(Arc::clone(&traces), Arc::clone(&metrics)).layer(http_trace_layer());
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("binding query API listener on {api_addr}"))?;
    info!("query API listening on {}", api_addr);

    let result = tokio::select! {
        result = grpc => result.context("OTLP/gRPC server"),
        result = axum::serve(ingest_listener, ingest_app).into_future() => {
            result.context("OTLP/HTTP server")
        }
        result = axum::serve(api_listener, api_app).into_future() => {
            result.context("query API server")
        }
        result = tokio::signal::ctrl_c() => {
            info!("shutting down");
            result.context("waiting for ctrl-c")
        }
    };

    eviction_handle.abort();

    result
}

fn http_trace_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    impl Fn(&Request<axum::body::Body>) -> tracing::Span + Clone,
    tower_http::trace::DefaultOnRequest,
    impl Fn(&axum::http::Response<axum::body::Body>, Duration, &tracing::Span) + Clone,
> {
    TraceLayer::new_for_http()
        .make_span_with(|request: &Request<axum::body::Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                latency = Empty,
            )
        })
        .on_response(
            |response: &axum::http::Response<axum::body::Body>,
             latency: Duration,
             span: &tracing::Span| {
                let latency_ms = latency.as_secs_f64() * 1000.0;
                span.record("latency", field::debug(latency_ms));
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms,
                    "response generated"
                );
            },
        )
}
