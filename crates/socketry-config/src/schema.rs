//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections. Every
//! field has a default, so a file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// `[server]` section: listener, worker pool, limits and timeouts.
///
/// # Example
///
/// ```
/// use socketry_config::ServerSettings;
///
/// let settings = ServerSettings {
///     addr: "127.0.0.1:9001".to_string(),
///     worker_threads: 2,
///     ..Default::default()
/// };
/// assert_eq!(settings.close_timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Number of runtime worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Maximum number of open connections. Unset means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Time allowed for the HTTP upgrade, in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Time allowed for the peer to answer a close frame, in milliseconds.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    /// Time `stop` waits for connections to finish, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Stop on SIGINT/SIGTERM.
    #[serde(default = "default_true")]
    pub stop_on_os_signal: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            worker_threads: default_worker_threads(),
            max_connections: None,
            handshake_timeout_ms: default_handshake_timeout(),
            close_timeout_ms: default_close_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            stop_on_os_signal: true,
        }
    }
}

fn default_addr() -> String {
    socketry_ws::config::DEFAULT_ADDR.to_string()
}

fn default_worker_threads() -> usize {
    socketry_ws::config::DEFAULT_WORKER_THREADS
}

fn default_handshake_timeout() -> u64 {
    socketry_ws::config::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_close_timeout() -> u64 {
    socketry_ws::config::DEFAULT_CLOSE_TIMEOUT_MS
}

fn default_shutdown_timeout() -> u64 {
    socketry_ws::config::DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

/// `[websocket]` section: protocol limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebSocketSettings {
    /// Largest reassembled message accepted, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Largest single frame accepted, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Accept frames from clients that are not masked.
    #[serde(default)]
    pub accept_unmasked_frames: bool,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
            accept_unmasked_frames: false,
        }
    }
}

fn default_max_message_size() -> usize {
    64 << 20
}

fn default_max_frame_size() -> usize {
    16 << 20
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// `[telemetry.logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives (e.g., "info" or "info,socketry_ws=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[telemetry.metrics]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSettings {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus exporter address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// `[telemetry]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySettings {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_settings_default() {
        let settings = ServerSettings::default();
        assert_eq!(settings.addr, "0.0.0.0:8080");
        assert_eq!(settings.worker_threads, 4);
        assert_eq!(settings.max_connections, None);
        assert_eq!(settings.handshake_timeout_ms, 5000);
        assert_eq!(settings.shutdown_timeout_secs, 30);
        assert!(settings.stop_on_os_signal);
    }

    #[test]
    fn test_server_settings_deserialize() {
        let toml = r#"
            addr = "127.0.0.1:3000"
            max_connections = 100
        "#;
        let settings: ServerSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.addr, "127.0.0.1:3000");
        assert_eq!(settings.max_connections, Some(100));
        assert_eq!(settings.worker_threads, 4);
    }

    #[test]
    fn test_server_settings_unknown_field_rejected() {
        let toml = r#"
            addr = "127.0.0.1:3000"
            http2_enabled = true
        "#;
        let result: Result<ServerSettings, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_websocket_settings_default() {
        let settings = WebSocketSettings::default();
        assert_eq!(settings.max_message_size, 64 * 1024 * 1024);
        assert_eq!(settings.max_frame_size, 16 * 1024 * 1024);
        assert!(!settings.accept_unmasked_frames);
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);

        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);

        assert!(serde_json::from_str::<LogFormat>(r#""xml""#).is_err());
    }

    #[test]
    fn test_metrics_disabled_by_default() {
        let settings = MetricsSettings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.addr, "0.0.0.0:9090");
    }
}
