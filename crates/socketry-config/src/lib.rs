//! Typed configuration for Socketry servers.
//!
//! This crate loads a [`SocketryConfig`] with:
//! - TOML and JSON configuration files
//! - `.env` files via `dotenvy`
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! and converts it into the engine's [`socketry_ws::ServerConfig`] and the
//! [`socketry_telemetry::TelemetryConfig`].
//!
//! # Example
//!
//! ```no_run
//! use socketry_config::ConfigLoader;
//! use socketry_ws::WsServer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("socketry.toml")?
//!     .with_env_prefix("SOCKETRY")
//!     .load()?;
//!
//! socketry_telemetry::init_telemetry(&config.telemetry_config())?;
//! let server = WsServer::new(config.server_config());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:8080"
//! worker_threads = 4
//! max_connections = 10000
//! handshake_timeout_ms = 5000
//! close_timeout_ms = 5000
//! shutdown_timeout_secs = 30
//! stop_on_os_signal = true
//!
//! [websocket]
//! max_message_size = 67108864
//! max_frame_size = 16777216
//! accept_unmasked_frames = false
//!
//! [telemetry.logging]
//! enabled = true
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `SOCKETRY__SERVER__ADDR=0.0.0.0:9000`
//! - `SOCKETRY__SERVER__WORKER_THREADS=8`
//! - `SOCKETRY__TELEMETRY__METRICS__ENABLED=false`

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
