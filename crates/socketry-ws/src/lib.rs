//! Multi-threaded WebSocket server engine.
//!
//! `socketry-ws` accepts TCP connections, performs the WebSocket upgrade,
//! routes each connection to the first endpoint whose regular expression
//! matches the request path and dispatches messages to that endpoint's
//! handlers. Sends are non-blocking and ordered: each connection has a FIFO
//! queue drained by its own driver task, one write at a time.
//!
//! # Features
//!
//! - **RFC 6455** framing through `tokio-tungstenite`; ping/pong is answered
//!   by the codec and fragmented messages are reassembled before delivery
//! - **Regex routing** with first-match-wins ordering and capture groups
//! - **Ordered sends** with optional completion callbacks
//! - **Snapshot broadcast** over all connections or one endpoint's
//! - **Graceful stop** closing every connection with 1001
//! - **Panic isolation**: a panicking handler closes only its own
//!   connection, with 1011
//!
//! # Example
//!
//! ```rust,no_run
//! use socketry_ws::{Handlers, Message, ServerConfig, WsServer};
//!
//! fn main() -> Result<(), socketry_ws::WsError> {
//!     let server = WsServer::new(ServerConfig::builder().port(8080).build());
//!
//!     server.endpoint(
//!         "^/echo_thrice/?$",
//!         Handlers::new().on_message(|conn, msg| {
//!             let again = conn.clone();
//!             let third = msg.clone();
//!             // Written after the second send, once the first one completed.
//!             conn.send_with(msg.clone(), move |result| {
//!                 if result.is_ok() {
//!                     again.send(third);
//!                 }
//!             });
//!             conn.send(msg);
//!         }),
//!     )?;
//!
//!     let all = server.clone();
//!     server.endpoint(
//!         "^/echo_all/?$",
//!         Handlers::new().on_message(move |_conn, msg: Message| {
//!             all.broadcast(&msg);
//!         }),
//!     )?;
//!
//!     server.start()
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! TcpListener ──► HTTP/1.1 upgrade ──► validate ──► EndpointRegistry::resolve
//!                      │                                   │
//!                      │ 400 / 404 / 503                   ▼
//!                      ▼                            101 Switching Protocols
//!                 socket closed                            │
//!                                                          ▼
//!                     Connection registered (server + endpoint registries)
//!                                                          │
//!                                                          ▼
//!                driver task: on_open ─► read ─► on_message ─► send queue
//!                                  │                              │
//!                                  ▼                              ▼
//!                     on_close / on_error ◄──── one write at a time, callbacks
//! ```

pub mod config;
pub mod connection;
mod driver;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod upgrade;

pub use config::{ServerConfig, ServerConfigBuilder, WebSocketConfig};
pub use connection::{Connection, ConnectionId, ConnectionState, SendCallback};
pub use endpoint::{Endpoint, EndpointRegistry, Handlers};
pub use error::{CloseCode, WsError, WsResult};
pub use message::{CloseFrame, Message, Opcode};
pub use registry::{ConnectionRegistry, RegistryStats};
pub use server::{ServerState, WsServer};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
