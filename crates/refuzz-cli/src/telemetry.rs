//! Logging and OpenTelemetry setup.

use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{Config, RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,refuzz_engine=debug";

pub fn init_telemetry(otel_endpoint: Option<&str>, json_logs: bool) -> Result<()> {
    // The standard OTEL variable wins over the configured endpoint
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .or_else(|| otel_endpoint.map(|s| s.to_string()));

    let provider = match &endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            TracerProvider::builder()
                .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
                .with_config(
                    Config::default()
                        .with_sampler(Sampler::AlwaysOn)
                        .with_id_generator(RandomIdGenerator::default())
                        .with_resource(Resource::new(vec![
                            KeyValue::new(
                                SERVICE_NAME,
                                std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "refuzz".to_string()),
                            ),
                            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                        ])),
                )
                .build()
        }
        None => TracerProvider::builder()
            .with_config(Config::default().with_sampler(Sampler::AlwaysOff))
            .build(),
    };
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer("refuzz");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(json_logs.then(|| fmt::layer().json().with_target(true)))
        .with((!json_logs).then(|| fmt::layer().with_target(true)))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    match endpoint {
        Some(endpoint) => info!(endpoint = %endpoint, "OpenTelemetry export enabled"),
        None => info!("OpenTelemetry disabled (no endpoint configured)"),
    }
    Ok(())
}

pub fn shutdown_telemetry() {
    info!("Shutting down telemetry");
    global::shutdown_tracer_provider();
}
