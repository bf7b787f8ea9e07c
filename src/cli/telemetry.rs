//! Log subscriber setup and optional OTLP span export.
//!
//! Spans are exported over OTLP/gRPC only when `OTEL_EXPORTER_OTLP_ENDPOINT`
//! is set; `OTEL_EXPORTER_OTLP_HEADERS` (`key=value,...`) becomes request
//! metadata, e.g. for collector authentication.

use anyhow::{Context, Result, anyhow};
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::TraceContextPropagator,
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

use super::commands::logging::{LogFormat, Options};

const AUDIT_TARGET: &str = "audit";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// The `audit` target stays at INFO (DEBUG when mirroring) whatever the
/// global level, so persistence failures are always visible.
fn filter(options: &Options) -> Result<EnvFilter> {
    let audit_level = if options.audit_debug { "debug" } else { "info" };
    Ok(EnvFilter::builder()
        .with_default_directive(options.level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive(format!("{AUDIT_TARGET}={audit_level}").parse()?)
        .add_directive("hyper=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

fn endpoint(raw: &str) -> Result<&str> {
    let raw = raw.trim().trim_end_matches('/');
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Ok(raw)
    } else {
        Err(anyhow!(
            "OTEL_EXPORTER_OTLP_ENDPOINT must start with http:// or https://, got {raw:?}"
        ))
    }
}

fn metadata(headers: &str) -> Result<MetadataMap> {
    let mut meta = MetadataMap::new();
    for pair in headers.split(',').filter(|pair| !pair.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed OTLP header {pair:?}, expected key=value"))?;
        let key_str = key.trim().to_ascii_lowercase();
        let key = MetadataKey::<Ascii>::from_bytes(key_str.as_bytes())
            .map_err(|e| anyhow!("invalid OTLP header name {key_str}: {e}"))?;
        let value: MetadataValue<Ascii> = value
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid OTLP header value for {key_str}: {e}"))?;
        meta.insert(key, value);
    }
    Ok(meta)
}

fn tracer(endpoint: &str) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT);

    if endpoint.starts_with("https://") {
        builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
    }

    if let Ok(headers) = var("OTEL_EXPORTER_OTLP_HEADERS") {
        builder = builder.with_metadata(metadata(&headers)?);
    }

    let exporter = builder
        .build()
        .context("failed to build OTLP span exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes([
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", Ulid::new().to_string()),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter, the exporter or the subscriber cannot be set up
pub fn init(options: &Options) -> Result<()> {
    let fmt_layer = match options.format {
        LogFormat::Pretty => fmt::layer().with_target(true).pretty().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let otel_layer = match var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(raw) => Some(tracing_opentelemetry::layer().with_tracer(tracer(endpoint(&raw)?)?)),
        Err(_) => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter(options)?);
    tracing::subscriber::set_global_default(subscriber)?;

    debug!(
        "logging initialized (format: {:?}, audit debug: {})",
        options.format, options.audit_debug
    );
    Ok(())
}

/// Flush and shut down the tracer provider (noop if not initialized)
pub fn shutdown_tracer() {
    if let Some(tp) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = tp.shutdown();
    }
}
