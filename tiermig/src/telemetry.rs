//! Tracing Initialization
//!
//! `TigerStyle`: Optional telemetry with graceful fallback. Never panics if the
//! subscriber or `OTel` pipeline cannot be installed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tiermig::telemetry::{init_tracing, TelemetryConfig};
//!
//! // fmt subscriber, filter from RUST_LOG or "tiermig=info"
//! let _guard = init_tracing(TelemetryConfig::default()).expect("tracing init");
//! ```
//!
//! With the `opentelemetry` feature, setting an endpoint adds an OTLP layer:
//!
//! ```rust,no_run
//! use tiermig::telemetry::{init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("tiermig-node-0")
//!     .otlp_endpoint("http://localhost:4317")
//!     .sampling_rate(0.1)
//!     .build();
//! let _guard = init_tracing(config).expect("tracing init");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG` - Filter directives (default: `tiermig=info`)
//! - `OTEL_SERVICE_NAME` - Service name (default: "tiermig")

#[cfg(feature = "opentelemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "opentelemetry")]
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::constants::{
    TELEMETRY_BATCH_SIZE_MAX, TELEMETRY_EXPORT_TIMEOUT_MS, TELEMETRY_LOG_FILTER_DEFAULT,
    TELEMETRY_OTLP_ENDPOINT_DEFAULT,
    TELEMETRY_SAMPLING_RATE_DEFAULT, TELEMETRY_SAMPLING_RATE_MAX, TELEMETRY_SAMPLING_RATE_MIN,
    TELEMETRY_SERVICE_NAME_DEFAULT,
};

/// Telemetry configuration errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber installation failed
    #[error("telemetry initialization failed: {reason}")]
    InitFailed {
        /// The reason for the failure
        reason: String,
    },

    /// Invalid sampling rate provided
    #[error("invalid sampling rate: {rate} (must be in [0.0, 1.0])")]
    InvalidSamplingRate {
        /// The invalid sampling rate value
        rate: f64,
    },

    /// Invalid endpoint configuration
    #[error("invalid endpoint: {endpoint}")]
    InvalidEndpoint {
        /// The invalid endpoint string
        endpoint: String,
    },

    /// Filter directives did not parse
    #[error("invalid log filter {filter:?}: {reason}")]
    InvalidFilter {
        /// The directives given
        filter: String,
        /// Parser message
        reason: String,
    },

    /// An OTLP endpoint was set but the `opentelemetry` feature is off
    #[error("opentelemetry feature not enabled")]
    FeatureNotEnabled,
}

impl TelemetryError {
    /// Create an init failure.
    #[must_use]
    pub fn init_failed(reason: impl Into<String>) -> Self {
        Self::InitFailed {
            reason: reason.into(),
        }
    }
}

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Configuration for tracing output and optional OTLP export
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for exported spans
    pub service_name: String,

    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,

    /// OTLP collector endpoint; `None` keeps output local
    pub otlp_endpoint: Option<String>,

    /// Sampling rate (0.0 = no sampling, 1.0 = sample all)
    pub sampling_rate: f64,

    /// Timeout for export operations in milliseconds
    pub export_timeout_ms: u64,

    /// Maximum batch size for span export
    pub batch_size_max: usize,

    /// Colored fmt output
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| TELEMETRY_SERVICE_NAME_DEFAULT.to_string()),
            log_filter: TELEMETRY_LOG_FILTER_DEFAULT.to_string(),
            otlp_endpoint: None,
            sampling_rate: TELEMETRY_SAMPLING_RATE_DEFAULT,
            export_timeout_ms: TELEMETRY_EXPORT_TIMEOUT_MS,
            batch_size_max: TELEMETRY_BATCH_SIZE_MAX,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new builder for `TelemetryConfig`
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(TELEMETRY_SAMPLING_RATE_MIN..=TELEMETRY_SAMPLING_RATE_MAX).contains(&self.sampling_rate)
        {
            return Err(TelemetryError::InvalidSamplingRate {
                rate: self.sampling_rate,
            });
        }

        if self.service_name.is_empty() {
            return Err(TelemetryError::InvalidEndpoint {
                endpoint: "service_name cannot be empty".to_string(),
            });
        }

        if let Some(endpoint) = &self.otlp_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(TelemetryError::InvalidEndpoint {
                    endpoint: endpoint.clone(),
                });
            }
        }

        if self.batch_size_max == 0 || self.batch_size_max > TELEMETRY_BATCH_SIZE_MAX {
            return Err(TelemetryError::init_failed(format!(
                "batch_size_max must be in (0, {TELEMETRY_BATCH_SIZE_MAX}]"
            )));
        }

        self.env_filter().map(|_| ())
    }

    /// Filter from `RUST_LOG`, falling back to `log_filter`.
    fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.log_filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: self.log_filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Builder for `TelemetryConfig`
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    log_filter: Option<String>,
    otlp_endpoint: Option<String>,
    sampling_rate: Option<f64>,
    export_timeout_ms: Option<u64>,
    ansi: Option<bool>,
}

impl TelemetryConfigBuilder {
    /// Set the service name
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the fallback filter directives
    #[must_use]
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Export spans to an OTLP collector
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Export spans to the collector at `TELEMETRY_OTLP_ENDPOINT_DEFAULT`
    #[must_use]
    pub fn otlp(self) -> Self {
        self.otlp_endpoint(TELEMETRY_OTLP_ENDPOINT_DEFAULT)
    }

    /// Set the sampling rate
    #[must_use]
    pub fn sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = Some(rate);
        self
    }

    /// Set the export timeout
    #[must_use]
    pub fn export_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.export_timeout_ms = Some(timeout_ms);
        self
    }

    /// Enable or disable colored output
    #[must_use]
    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = Some(ansi);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(defaults.service_name),
            log_filter: self.log_filter.unwrap_or(defaults.log_filter),
            otlp_endpoint: self.otlp_endpoint.or(defaults.otlp_endpoint),
            sampling_rate: self.sampling_rate.unwrap_or(defaults.sampling_rate),
            export_timeout_ms: self.export_timeout_ms.unwrap_or(defaults.export_timeout_ms),
            batch_size_max: defaults.batch_size_max,
            ansi: self.ansi.unwrap_or(defaults.ansi),
        }
    }
}

/// Keeps exporters alive; dropping it flushes pending spans.
#[derive(Debug)]
pub struct TelemetryGuard {
    #[cfg(feature = "opentelemetry")]
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
    _private: (),
}

impl TelemetryGuard {
    /// Whether spans are exported over OTLP.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        #[cfg(feature = "opentelemetry")]
        {
            self.tracer.is_some()
        }
        #[cfg(not(feature = "opentelemetry"))]
        {
            false
        }
    }
}

#[cfg(feature = "opentelemetry")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.tracer.take().is_some() {
            opentelemetry::global::shutdown_tracer_provider();
            tracing::debug!("tracer provider shut down");
        }
    }
}

#[cfg(feature = "opentelemetry")]
fn install_otlp(config: &TelemetryConfig, endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::Resource;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_millis(config.export_timeout_ms));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config()
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    config.service_name.clone(),
                )]))
                .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
                    config.sampling_rate,
                )),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| TelemetryError::init_failed(format!("failed to install OTLP pipeline: {e}")))
}

/// Install the global tracing subscriber.
///
/// Always installs an fmt layer filtered by `RUST_LOG` or
/// `config.log_filter`. With an OTLP endpoint and the `opentelemetry`
/// feature, spans are also exported.
///
/// # Errors
///
/// Returns `FeatureNotEnabled` if an endpoint is set without the feature,
/// `InitFailed` if a global subscriber is already installed, or a
/// validation error for a bad config.
pub fn init_tracing(config: TelemetryConfig) -> Result<TelemetryGuard> {
    config.validate()?;
    let filter = config.env_filter()?;
    let fmt_layer = fmt::layer().with_target(true).with_ansi(config.ansi);

    #[cfg(feature = "opentelemetry")]
    {
        let tracer = config
            .otlp_endpoint
            .as_deref()
            .map(|endpoint| install_otlp(&config, endpoint))
            .transpose()?;
        let otel_layer = tracer
            .clone()
            .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .map_err(|e| TelemetryError::init_failed(format!("failed to set global subscriber: {e}")))?;

        tracing::info!(
            service_name = %config.service_name,
            exporting = tracer.is_some(),
            sampling_rate = config.sampling_rate,
            "tracing initialized"
        );
        Ok(TelemetryGuard {
            tracer,
            _private: (),
        })
    }

    #[cfg(not(feature = "opentelemetry"))]
    {
        if config.otlp_endpoint.is_some() {
            return Err(TelemetryError::FeatureNotEnabled);
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::init_failed(format!("failed to set global subscriber: {e}")))?;

        tracing::info!(service_name = %config.service_name, "tracing initialized");
        Ok(TelemetryGuard { _private: () })
    }
}
