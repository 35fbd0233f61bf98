//! HTTP front door of the ingest pipeline.
use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use ingest::config::Config;
use ingest::server::serve;

const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// OTLP exporter sampling `sampling_rate` of new traces and following the
/// caller's decision for propagated ones.
fn otlp_tracer(endpoint: &str, sampling_rate: f64, service: &str) -> Result<Tracer, TraceError> {
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sampling_rate)));
    let trace_config = opentelemetry_sdk::trace::Config::default()
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service.to_string(),
        )]));
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(OTLP_EXPORT_TIMEOUT);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(trace_config)
        .with_batch_config(BatchConfig::default())
        .with_exporter(exporter)
        .install_batch(runtime::Tokio)
}

/// Stdout logs filtered by RUST_LOG (INFO by default), plus INFO and above
/// spans exported over OTLP when `OTEL_URL` is set.
fn init_tracing(config: &Config) -> Result<(), TraceError> {
    let stdout = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    let otlp = match config.otel_url.as_deref() {
        Some(url) => Some(OpenTelemetryLayer::new(otlp_tracer(
            url,
            config.otel_sampling_rate,
            &config.otel_service_name,
        )?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(otlp.with_filter(LevelFilter::INFO))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env()?;
    init_tracing(&config)?;

    let mut term = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let shutdown = async move {
        tokio::select! {
            _ = term.recv() => {},
            _ = interrupt.recv() => {},
        };
        tracing::info!("shutdown signal received, draining requests");
    };

    let listener = tokio::net::TcpListener::bind(config.address).await?;
    serve(config, listener, shutdown).await
}
