//! Echo server.
//!
//! Serves three endpoints on port 8080 with 4 worker threads by default:
//!
//! - `/echo` sends every message back and logs its size and a hex dump;
//!   `/IR_decode`, its older name, is routed to the same handler
//! - `/echo_thrice` sends every message back three times; the third copy
//!   is queued from the first send's completion callback
//! - `/echo_all` forwards every message to all connected clients
//!
//! Configuration is read from the file named by the first argument (or
//! `socketry.toml` if present), then `.env`, then `SOCKETRY__*` variables.
//!
//! Try it from a browser console:
//!
//! ```text
//! var ws = new WebSocket("ws://localhost:8080/echo_thrice");
//! ws.onmessage = function (evt) { console.log(evt.data); };
//! ws.send("test");
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context;
use socketry_config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use socketry_ws::{Connection, Handlers, WsError, WsServer};
use tracing::{debug, info, warn};

/// The hex-dump echo, under its current and its older name.
const ECHO_PATH: &str = "^/(?:echo|IR_decode)/?$";

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "socketry.toml".to_string());

    let config = ConfigLoader::new()
        .with_optional_file(&path)
        .with_context(|| format!("loading {path}"))?
        .with_dotenv()?
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    socketry_telemetry::init_telemetry(&config.telemetry_config())
        .context("initializing telemetry")?;

    let server = WsServer::new(config.server_config());

    server.endpoint(ECHO_PATH, with_lifecycle_logs(echo_handlers()))?;
    server.endpoint("^/echo_thrice/?$", with_lifecycle_logs(echo_thrice_handlers()))?;
    server.endpoint(
        "^/echo_all/?$",
        with_lifecycle_logs(echo_all_handlers(server.clone())),
    )?;

    info!(
        addr = %config.server.addr,
        worker_threads = config.server.worker_threads,
        "Starting echo server"
    );
    server.start()?;
    info!("Echo server stopped");
    Ok(())
}

fn echo_handlers() -> Handlers {
    Handlers::new().on_message(|conn, msg| {
        debug!(
            connection_id = %conn.id(),
            size = msg.size(),
            hex = %hex_dump(msg.payload()),
            "Message received"
        );

        let id = conn.id();
        conn.send_with(msg, move |result| {
            if let Err(e) = result {
                warn!(connection_id = %id, error = %e, "Echo failed");
            }
        });
    })
}

fn echo_thrice_handlers() -> Handlers {
    Handlers::new().on_message(|conn, msg| {
        let again = Arc::clone(conn);
        let third = msg.clone();
        // Written after the first copy completes, so after the second one.
        conn.send_with(msg.clone(), move |result| {
            if result.is_ok() {
                again.send(third);
            }
        });
        conn.send(msg);
    })
}

fn echo_all_handlers(server: WsServer) -> Handlers {
    Handlers::new().on_message(move |conn, msg| {
        let delivered = server.broadcast(&msg);
        debug!(connection_id = %conn.id(), delivered, "Message forwarded");
    })
}

fn with_lifecycle_logs(handlers: Handlers) -> Handlers {
    handlers
        .on_open(|conn: &Arc<Connection>| {
            info!(
                connection_id = %conn.id(),
                remote_addr = %conn.remote_addr(),
                path = conn.path(),
                "Connection opened"
            );
        })
        .on_close(|conn, code, reason| {
            info!(connection_id = %conn.id(), code, reason, "Connection closed");
        })
        .on_error(|conn, err: &WsError| {
            warn!(
                connection_id = %conn.id(),
                code = err.code(),
                error = %err,
                "Connection error"
            );
        })
}

/// Space separated upper-case hex bytes.
fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(b""), "");
        assert_eq!(hex_dump(b"\x00\x0f\xff"), "00 0F FF");
        assert_eq!(hex_dump(b"test"), "74 65 73 74");
    }

    #[test]
    fn test_endpoints_register() {
        let server = WsServer::default();
        let echo = server.endpoint(ECHO_PATH, echo_handlers()).unwrap();
        server
            .endpoint("^/echo_thrice/?$", echo_thrice_handlers())
            .unwrap();
        server
            .endpoint("^/echo_all/?$", echo_all_handlers(server.clone()))
            .unwrap();
        assert_eq!(server.endpoints().len(), 3);

        assert!(echo.matches("/echo").is_some());
        assert!(echo.matches("/echo/").is_some());
        assert!(echo.matches("/IR_decode").is_some());
        assert!(echo.matches("/IR_decode/").is_some());
        assert!(echo.matches("/echo_thrice").is_none());
        assert!(echo.matches("/IR_decode/x").is_none());
    }
}
