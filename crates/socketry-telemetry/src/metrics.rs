//! Prometheus metrics for Socketry.
//!
//! The engine records through the `metrics` facade; nothing is collected
//! until [`init_metrics`] installs the Prometheus recorder, so the
//! `record_*` functions are free to call unconditionally.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `socketry_connections_total` | Counter | - | Connections that completed the upgrade |
//! | `socketry_active_connections` | Gauge | - | Connections currently open |
//! | `socketry_handshake_rejections_total` | Counter | `reason` | Handshakes answered with an error |
//! | `socketry_messages_received_total` | Counter | `endpoint` | Data messages delivered to handlers |
//! | `socketry_messages_sent_total` | Counter | `result` | Queued messages written (`ok`) or failed (`error`) |
//! | `socketry_send_queue_dropped_total` | Counter | - | Sends dropped because the connection was closing |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, info};

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed.
    pub enabled: bool,

    /// Address the exporter listens on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl MetricsConfig {
    /// An enabled exporter on `addr`.
    #[must_use]
    pub fn prometheus(addr: impl Into<String>) -> Self {
        Self {
            enabled: true,
            addr: addr.into(),
        }
    }
}

/// Installs the Prometheus recorder and serves it over HTTP on `config.addr`.
///
/// Does nothing when `config.enabled` is false. The exporter runs on the
/// current Tokio runtime when there is one, otherwise on a dedicated
/// `socketry-metrics` thread.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidAddress`] for an unparsable address and
/// [`TelemetryError::MetricsInit`] if a recorder is already installed or
/// the exporter cannot start.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    // The builder spawns its upkeep task and binds the listener on the
    // ambient runtime, so outside one it gets a runtime of its own.
    let own_runtime = match tokio::runtime::Handle::try_current() {
        Ok(_) => None,
        Err(_) => Some(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
        ),
    };

    let (recorder, exporter) = {
        let _guard = own_runtime.as_ref().map(tokio::runtime::Runtime::enter);
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
    };

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    let serve = async move {
        if let Err(e) = exporter.await {
            error!(error = ?e, "Prometheus exporter stopped");
        }
    };

    match own_runtime {
        None => {
            tokio::spawn(serve);
        }
        Some(runtime) => {
            std::thread::Builder::new()
                .name("socketry-metrics".to_string())
                .spawn(move || runtime.block_on(serve))
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
        }
    }

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "socketry_connections_total",
        "Total number of WebSocket connections that completed the upgrade"
    );
    describe_gauge!(
        "socketry_active_connections",
        "Number of WebSocket connections currently open"
    );
    describe_counter!(
        "socketry_handshake_rejections_total",
        "Total number of upgrade requests rejected, by reason"
    );
    describe_counter!(
        "socketry_messages_received_total",
        "Total number of data messages delivered to handlers, by endpoint"
    );
    describe_counter!(
        "socketry_messages_sent_total",
        "Total number of queued messages written to the transport, by result"
    );
    describe_counter!(
        "socketry_send_queue_dropped_total",
        "Total number of sends dropped because the connection was closing"
    );
}

/// Records a connection that completed the upgrade.
pub fn record_connection_opened() {
    counter!("socketry_connections_total").increment(1);
    gauge!("socketry_active_connections").increment(1.0);
}

/// Records a connection whose driver finished.
pub fn record_connection_closed() {
    gauge!("socketry_active_connections").decrement(1.0);
}

/// Records a rejected handshake.
///
/// `reason` is a short label such as `not_websocket`, `no_endpoint`,
/// `capacity`, `stopping` or `timeout`.
pub fn record_handshake_rejected(reason: &'static str) {
    counter!("socketry_handshake_rejections_total", "reason" => reason).increment(1);
}

/// Records a data message delivered to the handler of `endpoint`.
pub fn record_message_received(endpoint: &str) {
    counter!(
        "socketry_messages_received_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

/// Records the outcome of one queued write.
pub fn record_message_sent(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("socketry_messages_sent_total", "result" => result).increment(1);
}

/// Records a send dropped without being written.
pub fn record_send_dropped() {
    counter!("socketry_send_queue_dropped_total").increment(1);
}
