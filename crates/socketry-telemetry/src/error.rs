//! Telemetry error types.

use thiserror::Error;

/// Why telemetry could not be installed.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The Prometheus recorder or its HTTP listener could not start, or a
    /// recorder was already installed.
    #[error("metrics exporter: {0}")]
    MetricsInit(String),

    /// The log filter did not parse or a subscriber was already set.
    #[error("log subscriber: {0}")]
    LoggingInit(String),

    /// The exporter address is not a socket address.
    #[error("invalid exporter address {0}")]
    InvalidAddress(String),
}
