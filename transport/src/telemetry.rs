//! Tracing subscriber setup
//!
//! Installs a `tracing` registry with an `EnvFilter`, console output and,
//! when a Jaeger endpoint is configured, an OpenTelemetry layer so the
//! `http.client` spans are exported and their context propagated.

use crate::config::ObservabilityConfig;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initialize global tracing from configuration.
///
/// `RUST_LOG` takes precedence over the configured log level.
///
/// # Errors
///
/// Returns error if the Jaeger pipeline cannot be installed or a global
/// subscriber is already set
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let fmt = tracing_subscriber::fmt::layer().with_target(true);

    let otel = match &config.jaeger_endpoint {
        Some(endpoint) => {
            global::set_text_map_propagator(TraceContextPropagator::new());
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_service_name(config.service_name.clone())
                .with_endpoint(endpoint.as_str())
                .install_simple()?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        },
        None => None,
    };

    let subscriber = Registry::default().with(filter).with(fmt).with(otel);
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        service = %config.service_name,
        exporting = config.jaeger_endpoint.is_some(),
        "Tracing initialized"
    );

    Ok(())
}

/// Flush and shut down span export.
///
/// Call during graceful shutdown.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}
