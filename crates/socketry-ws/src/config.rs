//! Server and codec configuration.
//!
//! [`ServerConfig`] is built with [`ServerConfig::builder()`]; the
//! codec limits live in [`WebSocketConfig`] and are passed to
//! tungstenite for every upgraded connection.
//!
//! # Example
//!
//! ```rust
//! use socketry_ws::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .addr("127.0.0.1:9001")
//!     .worker_threads(2)
//!     .close_timeout(Duration::from_secs(2))
//!     .build();
//!
//! assert_eq!(config.addr(), "127.0.0.1:9001");
//! assert_eq!(config.worker_threads(), 2);
//! ```

use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Default number of runtime worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default close-handshake timeout in milliseconds.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Codec limits applied to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum reassembled message size in bytes (default: 64 MB).
    pub max_message_size: usize,
    /// Maximum single frame size in bytes (default: 16 MB).
    pub max_frame_size: usize,
    /// Whether to accept unmasked frames from clients (default: false).
    pub accept_unmasked_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            max_frame_size: 16 * 1024 * 1024,
            accept_unmasked_frames: false,
        }
    }
}

impl WebSocketConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set whether to accept unmasked frames from clients.
    #[must_use]
    pub fn accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// The tungstenite configuration equivalent to these limits.
    pub fn to_tungstenite(&self) -> tungstenite::protocol::WebSocketConfig {
        let mut cfg = tungstenite::protocol::WebSocketConfig::default();
        cfg.max_message_size = Some(self.max_message_size);
        cfg.max_frame_size = Some(self.max_frame_size);
        cfg.accept_unmasked_frames = self.accept_unmasked_frames;
        cfg
    }
}

/// Server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    addr: String,
    worker_threads: usize,
    max_connections: Option<usize>,
    handshake_timeout: Duration,
    close_timeout: Duration,
    shutdown_timeout: Duration,
    stop_on_os_signal: bool,
    websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Creates a new server configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the listen address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Parses and returns the listen address as a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.addr.parse()
    }

    /// Returns the number of runtime worker threads used by `start()`.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Returns the connection limit, if configured.
    #[must_use]
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Returns how long a client may take to complete the upgrade.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns how long to wait for the peer's close reply.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Returns how long `stop()` waits for connection drivers to finish.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns whether SIGINT/SIGTERM stop the server.
    #[must_use]
    pub fn stop_on_os_signal(&self) -> bool {
        self.stop_on_os_signal
    }

    /// Returns the codec limits.
    #[must_use]
    pub fn websocket(&self) -> &WebSocketConfig {
        &self.websocket
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    addr: String,
    worker_threads: usize,
    max_connections: Option<usize>,
    handshake_timeout: Duration,
    close_timeout: Duration,
    shutdown_timeout: Duration,
    stop_on_os_signal: bool,
    websocket: WebSocketConfig,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            worker_threads: DEFAULT_WORKER_THREADS,
            max_connections: None,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            stop_on_os_signal: false,
            websocket: WebSocketConfig::default(),
        }
    }

    /// Sets the listen address, e.g. `"0.0.0.0:8080"` or `"127.0.0.1:0"`.
    #[must_use]
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Sets the listen port on all interfaces.
    #[must_use]
    pub fn port(self, port: u16) -> Self {
        self.addr(format!("0.0.0.0:{port}"))
    }

    /// Sets the number of worker threads. Values below 1 are raised to 1.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets the maximum number of concurrent connections.
    ///
    /// Handshakes beyond the limit are answered with 503.
    #[must_use]
    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the close-handshake timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Stop the server on SIGINT/SIGTERM.
    #[must_use]
    pub fn stop_on_os_signal(mut self, enabled: bool) -> Self {
        self.stop_on_os_signal = enabled;
        self
    }

    /// Sets the codec limits.
    #[must_use]
    pub fn websocket(mut self, websocket: WebSocketConfig) -> Self {
        self.websocket = websocket;
        self
    }

    /// Builds the server configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            worker_threads: self.worker_threads,
            max_connections: self.max_connections,
            handshake_timeout: self.handshake_timeout,
            close_timeout: self.close_timeout,
            shutdown_timeout: self.shutdown_timeout,
            stop_on_os_signal: self.stop_on_os_signal,
            websocket: self.websocket,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
