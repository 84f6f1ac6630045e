//! Logging and tracing setup shared by the finrag binaries.
//!
//! Logs go to stdout as human-readable text or JSON lines, filtered through
//! `RUST_LOG`. When an OTLP endpoint is configured, spans are also exported
//! over gRPC with `opentelemetry-otlp`.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Selects the log line format.
pub const LOG_FORMAT_VAR: &str = "FINRAG_LOG_FORMAT";
/// Enables span export when set.
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A configuration value could not be understood.
    #[error("invalid telemetry setting: {0}")]
    Config(String),

    /// The OTLP exporter could not be built.
    #[error("failed to install OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::Config(format!(
                "{LOG_FORMAT_VAR} must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// What to install.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Reported as `service.name` on exported spans.
    pub service_name: String,
    /// Stdout format.
    pub log_format: LogFormat,
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    pub otlp_endpoint: Option<String>,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl TelemetryConfig {
    /// Text logs at `info`, no export.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_format: LogFormat::Text,
            otlp_endpoint: None,
            default_filter: "info".to_string(),
        }
    }

    /// Read [`LOG_FORMAT_VAR`] and [`OTLP_ENDPOINT_VAR`] through `lookup`.
    pub fn from_lookup(
        service_name: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TelemetryError> {
        let mut config = Self::new(service_name);
        if let Some(format) = lookup(LOG_FORMAT_VAR) {
            config.log_format = format.parse()?;
        }
        config.otlp_endpoint = lookup(OTLP_ENDPOINT_VAR).filter(|e| !e.trim().is_empty());
        Ok(config)
    }

    /// Read settings from the process environment.
    pub fn from_env(service_name: impl Into<String>) -> Result<Self, TelemetryError> {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }
}

/// Flushes exported spans when dropped. Keep it alive for the life of `main`.
#[must_use = "dropping the guard shuts down span export"]
#[derive(Debug)]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Span export needs a running Tokio runtime.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
                .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
                    Resource::new(vec![KeyValue::new("service.name", config.service_name.clone())]),
                ))
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let (text_layer, json_layer) = match config.log_format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().flatten_event(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(text_layer)
        .with(json_layer)
        .try_init()?;

    tracing::debug!(
        service = %config.service_name,
        format = ?config.log_format,
        otlp = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "telemetry initialized"
    );
    Ok(TelemetryGuard { exporting: config.otlp_endpoint.is_some() })
}
