use std::env;

use anyhow::Result;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    resource::Resource,
    runtime::Tokio,
    trace::{self, Sampler},
};
use tracing::{info, warn};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Registry = tracing_subscriber::registry::Registry;

pub const SAMPLING_RATE_ENV: &str = "ADMIN_OTEL_SAMPLING_RATE";

/// Flushes pending spans when dropped. Keep it alive for the whole process.
#[derive(Debug)]
#[must_use]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

/// Trace sampling ratio read from the environment, plus a warning when the
/// raw value had to be corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampling {
    pub rate: f64,
    pub warning: Option<String>,
}

impl Sampling {
    fn exact(rate: f64) -> Self {
        Self {
            rate,
            warning: None,
        }
    }

    fn corrected(rate: f64, warning: String) -> Self {
        Self {
            rate,
            warning: Some(warning),
        }
    }
}

pub fn init(service_name: &str) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sampling = parse_sampling_rate(env::var(SAMPLING_RATE_ENV).ok().as_deref());

    let (otel_layer, otel_error) = match build_otel_layer(service_name, sampling.rate) {
        Ok(layer) => (layer, None),
        Err(error) => (None, Some(error)),
    };
    let guard = TelemetryGuard {
        exporting: otel_layer.is_some(),
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(message) = &sampling.warning {
        warn!("{message}");
    }
    if let Some(error) = otel_error {
        warn!(%error, "OTLP exporter unavailable; logging to console only");
    }
    info!(sampling_rate = sampling.rate, service = service_name, "telemetry initialised");

    Ok(guard)
}

fn build_otel_layer(
    service_name: &str,
    sampling_rate: f64,
) -> Result<Option<OpenTelemetryLayer<Registry, trace::Tracer>>> {
    if sampling_rate <= 0.0 {
        return Ok(None);
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::TraceIdRatioBased(sampling_rate))
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .install_batch(Tokio)?;

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Missing means sample everything; zero disables the exporter.
pub fn parse_sampling_rate(raw: Option<&str>) -> Sampling {
    let Some(raw) = raw else {
        return Sampling::exact(1.0);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Sampling::corrected(1.0, format!("{SAMPLING_RATE_ENV} is empty; using 1.0"));
    }

    match trimmed.parse::<f64>() {
        Ok(rate) if (0.0..=1.0).contains(&rate) => Sampling::exact(rate),
        Ok(rate) if rate.is_nan() => Sampling::corrected(
            1.0,
            format!("{SAMPLING_RATE_ENV}={trimmed} is not a number; using 1.0"),
        ),
        Ok(rate) => {
            let clamped = rate.clamp(0.0, 1.0);
            Sampling::corrected(
                clamped,
                format!("{SAMPLING_RATE_ENV}={trimmed} outside 0.0..=1.0; clamped to {clamped}"),
            )
        }
        Err(_) => Sampling::corrected(
            1.0,
            format!("{SAMPLING_RATE_ENV}='{trimmed}' is not a valid float; using 1.0"),
        ),
    }
}
