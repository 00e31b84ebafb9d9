//! Observability for Socketry.
//!
//! This crate provides the logging and metrics layers used by the
//! `socketry-ws` engine and applications built on it:
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  socketry-ws                  │
//! │   tracing::info!/debug!     record_*()        │
//! └──────────────┬──────────────────┬─────────────┘
//!                │                  │
//!                ▼                  ▼
//!        ┌──────────────┐   ┌───────────────┐
//!        │   Logging    │   │    Metrics    │
//!        │ (subscriber) │   │ (Prometheus)  │
//!        └──────┬───────┘   └───────┬───────┘
//!               ▼                   ▼
//!         stdout/stderr        GET /metrics
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use socketry_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .log_level("info,socketry_ws=debug")
//!     .metrics_addr("0.0.0.0:9090")
//!     .build();
//!
//! init_telemetry(&config)?;
//! ```
//!
//! The exporter then serves:
//!
//! ```text
//! # HELP socketry_active_connections Number of WebSocket connections currently open
//! # TYPE socketry_active_connections gauge
//! socketry_active_connections 12
//! # TYPE socketry_handshake_rejections_total counter
//! socketry_handshake_rejections_total{reason="no_endpoint"} 3
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{
    init_metrics, record_connection_closed, record_connection_opened, record_handshake_rejected,
    record_message_received, record_message_sent, record_send_dropped, render_metrics,
    MetricsConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}
