//! `TigerStyle` Constants
//!
//! Engine-side limits. Collaborator and loop limits live in
//! [`tiermig_core::constants`] and are re-exported here.

pub use tiermig_core::constants::*;

// =============================================================================
// Telemetry
// =============================================================================

/// Default `EnvFilter` directive when `RUST_LOG` is unset
pub const TELEMETRY_LOG_FILTER_DEFAULT: &str = "tiermig=info";

/// Default service name reported to the collector
pub const TELEMETRY_SERVICE_NAME_DEFAULT: &str = "tiermig";

/// Default OTLP collector endpoint
pub const TELEMETRY_OTLP_ENDPOINT_DEFAULT: &str = "http://localhost:4317";

/// Maximum spans per export batch
pub const TELEMETRY_BATCH_SIZE_MAX: usize = 512;

/// Export timeout
pub const TELEMETRY_EXPORT_TIMEOUT_MS: u64 = 5_000;

/// Default trace sampling rate
pub const TELEMETRY_SAMPLING_RATE_DEFAULT: f64 = 1.0;

/// Minimum trace sampling rate
pub const TELEMETRY_SAMPLING_RATE_MIN: f64 = 0.0;

/// Maximum trace sampling rate
pub const TELEMETRY_SAMPLING_RATE_MAX: f64 = 1.0;
