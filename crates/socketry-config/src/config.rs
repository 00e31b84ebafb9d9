//! Main configuration types.
//!
//! This module provides the top-level [`SocketryConfig`] struct, its
//! builder and its conversions into the engine and telemetry configs.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socketry_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use socketry_ws::{ServerConfig, WebSocketConfig};

use crate::{
    ConfigError, LogFormat, LoggingSettings, MetricsSettings, ServerSettings, TelemetrySettings,
    WebSocketSettings,
};

/// Complete Socketry server configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use socketry_config::SocketryConfig;
///
/// let config = SocketryConfig::default();
/// assert_eq!(config.server.addr, "0.0.0.0:8080");
///
/// let server = config.server_config();
/// assert_eq!(server.worker_threads(), 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SocketryConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerSettings,

    /// WebSocket protocol limits.
    #[serde(default)]
    pub websocket: WebSocketSettings,

    /// Telemetry configuration (logging, metrics).
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl SocketryConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> SocketryConfigBuilder {
        SocketryConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The server or metrics address does not parse
    /// - `worker_threads` or `max_connections` is zero
    /// - A timeout is zero
    /// - `max_frame_size` exceeds `max_message_size`
    /// - The log filter does not parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.addr",
                format!("invalid socket address: {}", self.server.addr),
            ));
        }

        if self.server.worker_threads == 0 {
            return Err(ConfigError::invalid_value(
                "server.worker_threads",
                "must be at least 1",
            ));
        }

        if self.server.max_connections == Some(0) {
            return Err(ConfigError::invalid_value(
                "server.max_connections",
                "must be at least 1 when set",
            ));
        }

        for (field, value) in [
            ("server.handshake_timeout_ms", self.server.handshake_timeout_ms),
            ("server.close_timeout_ms", self.server.close_timeout_ms),
            ("server.shutdown_timeout_secs", self.server.shutdown_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be greater than 0"));
            }
        }

        if self.websocket.max_frame_size > self.websocket.max_message_size {
            return Err(ConfigError::invalid_value(
                "websocket.max_frame_size",
                "must not exceed websocket.max_message_size",
            ));
        }

        if self.telemetry.metrics.enabled
            && self.telemetry.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        if let Err(e) = socketry_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
        {
            return Err(ConfigError::invalid_value(
                "telemetry.logging.level",
                e.to_string(),
            ));
        }

        Ok(())
    }

    /// Development preset: pretty `debug` logs with source locations.
    ///
    /// ```
    /// use socketry_config::SocketryConfig;
    ///
    /// let config = SocketryConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.addr = "127.0.0.1:8080".to_string();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config
    }

    /// Production preset: JSON `info` logs and the Prometheus exporter.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;
        config
    }

    /// The engine configuration described by the `[server]` and
    /// `[websocket]` sections.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let server = &self.server;
        ServerConfig::builder()
            .addr(server.addr.clone())
            .worker_threads(server.worker_threads)
            .max_connections(server.max_connections)
            .handshake_timeout(Duration::from_millis(server.handshake_timeout_ms))
            .close_timeout(Duration::from_millis(server.close_timeout_ms))
            .shutdown_timeout(Duration::from_secs(server.shutdown_timeout_secs))
            .stop_on_os_signal(server.stop_on_os_signal)
            .websocket(WebSocketConfig::from(&self.websocket))
            .build()
    }

    /// The telemetry configuration described by the `[telemetry]` section.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: LogConfig::from(&self.telemetry.logging),
            metrics: MetricsConfig::from(&self.telemetry.metrics),
        }
    }
}

impl From<&WebSocketSettings> for WebSocketConfig {
    fn from(settings: &WebSocketSettings) -> Self {
        WebSocketConfig::new()
            .max_message_size(settings.max_message_size)
            .max_frame_size(settings.max_frame_size)
            .accept_unmasked_frames(settings.accept_unmasked_frames)
    }
}

impl From<&LoggingSettings> for LogConfig {
    fn from(settings: &LoggingSettings) -> Self {
        let base = match settings.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: settings.enabled,
            file_line_info: settings.include_location,
            ..base.with_level(settings.level.clone())
        }
    }
}

impl From<&MetricsSettings> for MetricsConfig {
    fn from(settings: &MetricsSettings) -> Self {
        MetricsConfig {
            enabled: settings.enabled,
            addr: settings.addr.clone(),
        }
    }
}

/// Builder for [`SocketryConfig`].
#[derive(Debug, Default)]
pub struct SocketryConfigBuilder {
    server: Option<ServerSettings>,
    websocket: Option<WebSocketSettings>,
    telemetry: Option<TelemetrySettings>,
}

impl SocketryConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerSettings) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the websocket section.
    #[must_use]
    pub fn websocket(mut self, websocket: WebSocketSettings) -> Self {
        self.websocket = Some(websocket);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetrySettings) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> SocketryConfig {
        SocketryConfig {
            server: self.server.unwrap_or_default(),
            websocket: self.websocket.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<SocketryConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_server(server: ServerSettings) -> SocketryConfig {
        SocketryConfig::builder().server(server).build()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SocketryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert!(!config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_validate_invalid_addr() {
        let config = with_server(ServerSettings {
            addr: "not-an-address".to_string(),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.addr"));
    }

    #[test]
    fn test_validate_zero_worker_threads() {
        let config = with_server(ServerSettings {
            worker_threads: 0,
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = with_server(ServerSettings {
            close_timeout_ms: 0,
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("close_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let config = with_server(ServerSettings {
            max_connections: Some(0),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_frame_larger_than_message() {
        let config = SocketryConfig::builder()
            .websocket(WebSocketSettings {
                max_message_size: 1024,
                max_frame_size: 4096,
                accept_unmasked_frames: false,
            })
            .build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_frame_size"));
    }

    #[test]
    fn test_validate_metrics_addr_only_when_enabled() {
        let mut config = SocketryConfig::default();
        config.telemetry.metrics.addr = "invalid".to_string();
        assert!(config.validate().is_ok());

        config.telemetry.metrics.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metrics.addr"));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = SocketryConfig::default();
        config.telemetry.logging.level = "socketry_ws=[".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_presets() {
        let dev = SocketryConfig::development();
        assert_eq!(dev.telemetry.logging.format, LogFormat::Pretty);
        assert!(dev.validate().is_ok());

        let prod = SocketryConfig::production();
        assert_eq!(prod.telemetry.logging.format, LogFormat::Json);
        assert!(prod.telemetry.metrics.enabled);
        assert!(prod.validate().is_ok());
    }

    #[test]
    fn test_server_config_conversion() {
        let config = with_server(ServerSettings {
            addr: "127.0.0.1:9001".to_string(),
            worker_threads: 2,
            max_connections: Some(10),
            close_timeout_ms: 250,
            stop_on_os_signal: false,
            ..Default::default()
        });

        let server = config.server_config();
        assert_eq!(server.addr(), "127.0.0.1:9001");
        assert_eq!(server.worker_threads(), 2);
        assert_eq!(server.max_connections(), Some(10));
        assert_eq!(server.close_timeout(), Duration::from_millis(250));
        assert_eq!(server.shutdown_timeout(), Duration::from_secs(30));
        assert!(!server.stop_on_os_signal());
    }

    #[test]
    fn test_telemetry_config_conversion() {
        let config = SocketryConfig::development();
        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.logging.level, "debug");
        assert!(!telemetry.logging.json_format);
        assert!(telemetry.logging.file_line_info);
        assert!(!telemetry.metrics.enabled);
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = SocketryConfig::production();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[websocket]"));
        assert!(toml_str.contains("[telemetry.metrics]"));

        let parsed: SocketryConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let toml_str = r#"
            [authorization]
            enabled = true
        "#;
        assert!(toml::from_str::<SocketryConfig>(toml_str).is_err());
    }
}
