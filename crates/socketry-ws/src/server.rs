//! The WebSocket server.
//!
//! # Architecture
//!
//! - A TCP listener bound to the configured address.
//! - One task per accepted socket serving a single HTTP/1.1 request with
//!   upgrades enabled. Requests that are not valid upgrades, match no
//!   endpoint or arrive while the server is full or stopping are answered
//!   with 400, 404 or 503 and the socket is closed.
//! - One [driver](crate::driver) task per upgraded connection.
//! - Lifecycle `Created → Running → Stopping → Stopped`.
//!
//! # Example
//!
//! ```rust,no_run
//! use socketry_ws::{Handlers, ServerConfig, WsServer};
//!
//! fn main() -> Result<(), socketry_ws::WsError> {
//!     let server = WsServer::new(ServerConfig::builder().port(8080).worker_threads(4).build());
//!     server.endpoint("^/echo/?$", Handlers::new().on_message(|conn, msg| conn.send(msg)))?;
//!     server.start()
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{Request, Response};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, instrument, warn};
use tungstenite::protocol::Role;

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionInfo};
use crate::driver::Driver;
use crate::endpoint::{Endpoint, EndpointRegistry, Handlers};
use crate::error::{CloseCode, WsError, WsResult};
use crate::message::{CloseFrame, Message};
use crate::registry::ConnectionRegistry;
use crate::shutdown::{wait_for_os_signal, ConnectionTracker, ShutdownSignal};
use crate::upgrade;

/// Lifecycle state of a [`WsServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet listening.
    Created,
    /// Listening and accepting connections.
    Running,
    /// No longer accepting; open connections are being closed.
    Stopping,
    /// Fully stopped.
    Stopped,
}

/// A multi-threaded WebSocket server.
///
/// Cloning is cheap; clones control the same server, so one clone can call
/// [`stop`](Self::stop) while another is blocked in [`start`](Self::start).
#[derive(Debug, Clone)]
pub struct WsServer {
    inner: Arc<ServerInner>,
}

#[derive(Debug)]
struct ServerInner {
    config: ServerConfig,
    endpoints: EndpointRegistry,
    connections: ConnectionRegistry,
    state: watch::Sender<ServerState>,
    started: AtomicBool,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WsServer {
    /// Create a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let connections = ConnectionRegistry::with_limit(config.max_connections());
        Self {
            inner: Arc::new(ServerInner {
                config,
                endpoints: EndpointRegistry::new(),
                connections,
                state: watch::Sender::new(ServerState::Created),
                started: AtomicBool::new(false),
                shutdown: ShutdownSignal::new(),
                tracker: ConnectionTracker::new(),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Register an endpoint. Endpoints are matched in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidPattern`] if the pattern does not compile.
    pub fn endpoint(&self, pattern: &str, handlers: Handlers) -> WsResult<Arc<Endpoint>> {
        self.inner.endpoints.register(pattern, handlers)
    }

    /// All registered endpoints in registration order.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner.endpoints.all()
    }

    /// Snapshot of all live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.connections.all()
    }

    /// The server-wide connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    /// Queue a message on a connection.
    pub fn send(&self, connection: &Connection, message: impl Into<Message>) {
        connection.send(message);
    }

    /// Queue a message on a connection with a completion callback.
    pub fn send_with<F>(&self, connection: &Connection, message: impl Into<Message>, on_complete: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        connection.send_with(message, on_complete);
    }

    /// Queue a message on every live connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        self.inner.connections.broadcast(message)
    }

    /// The bound address, once the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Wait until the server is listening and return its address.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::InvalidState`] if the server stopped or failed to
    /// bind instead.
    pub async fn ready(&self) -> WsResult<SocketAddr> {
        let mut rx = self.inner.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != ServerState::Created)
            .await
            .map_err(|_| WsError::internal("server state channel closed"))?;

        match (state, self.local_addr()) {
            (ServerState::Running, Some(addr)) => Ok(addr),
            (state, _) => Err(WsError::invalid_state(format!("server is {state:?}"))),
        }
    }

    /// Wait until the server reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServerState::Stopped).await;
    }

    /// Request a stop. `start()`/`run()` return once every connection has
    /// closed or the shutdown timeout has passed.
    pub fn stop(&self) {
        let never_started = self.inner.state.send_if_modified(|state| {
            if *state == ServerState::Created {
                *state = ServerState::Stopped;
                true
            } else {
                false
            }
        });
        if !never_started {
            info!("Stop requested");
        }
        self.inner.shutdown.trigger();
    }

    /// Build a runtime with the configured worker count and serve until
    /// [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built, the address cannot
    /// be bound, or the server was already started or stopped.
    pub fn start(&self) -> WsResult<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.inner.config.worker_threads())
            .thread_name("socketry-worker")
            .enable_all()
            .build()
            .map_err(|e| WsError::internal(format!("failed to build runtime: {e}")))?;

        runtime.block_on(self.run())
    }

    /// Serve on the current runtime until [`stop`](Self::stop) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server was
    /// already started or stopped.
    pub async fn run(&self) -> WsResult<()> {
        let inner = &self.inner;

        if self.state() == ServerState::Stopped {
            return Err(WsError::invalid_state("server was stopped before it started"));
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(WsError::invalid_state("server already started"));
        }

        let listener = match inner.bind().await {
            Ok(listener) => listener,
            Err(err) => {
                inner.state.send_replace(ServerState::Stopped);
                return Err(err);
            }
        };

        let addr = listener.local_addr()?;
        *inner.local_addr.lock() = Some(addr);
        inner.state.send_replace(ServerState::Running);
        info!(
            %addr,
            worker_threads = inner.config.worker_threads(),
            endpoints = inner.endpoints.len(),
            "WebSocket server listening"
        );

        let signal_task = inner.config.stop_on_os_signal().then(|| {
            let server = self.clone();
            tokio::spawn(async move {
                match wait_for_os_signal().await {
                    Ok(()) => server.stop(),
                    Err(err) => warn!(error = %err, "Failed to install signal handlers"),
                }
            })
        });

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, remote_addr)) => {
                        let inner = Arc::clone(inner);
                        let token = inner.tracker.track();
                        tokio::spawn(async move {
                            inner.serve_handshake(stream, remote_addr).await;
                            drop(token);
                        });
                    }
                    Err(err) => warn!(error = %err, "Failed to accept connection"),
                },
                () = inner.shutdown.recv() => break,
            }
        }

        drop(listener);
        inner.state.send_replace(ServerState::Stopping);

        let open = inner.connections.all();
        let shutdown_timeout = inner.config.shutdown_timeout();
        info!(
            connections = open.len(),
            timeout = ?shutdown_timeout,
            "Stopping server, closing connections"
        );
        for conn in &open {
            conn.close(CloseCode::GoingAway, "server shutting down");
        }
        drop(open);

        if tokio::time::timeout(shutdown_timeout, inner.tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                remaining = inner.tracker.active(),
                "Shutdown timeout reached with connections still active"
            );
        }

        if let Some(task) = signal_task {
            task.abort();
        }
        inner.state.send_replace(ServerState::Stopped);
        info!("WebSocket server stopped");
        Ok(())
    }
}

impl Default for WsServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl ServerInner {
    fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    async fn bind(&self) -> WsResult<TcpListener> {
        let addr = self.config.socket_addr().map_err(|e| WsError::Bind {
            addr: self.config.addr().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        TcpListener::bind(addr).await.map_err(|source| WsError::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    /// Serve the single HTTP request of a fresh socket.
    async fn serve_handshake(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%remote_addr, error = %err, "Failed to set TCP_NODELAY");
        }

        let server = Arc::clone(&self);
        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(req, remote_addr)) }
        });

        let conn = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();

        match tokio::time::timeout(self.config.handshake_timeout(), conn).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%remote_addr, error = %err, "Handshake connection error"),
            Err(_) => {
                socketry_telemetry::record_handshake_rejected("timeout");
                warn!(
                    %remote_addr,
                    timeout = ?self.config.handshake_timeout(),
                    "Handshake timed out"
                );
            }
        }
    }

    /// Everything a valid handshake needs to proceed.
    fn accept<B>(&self, req: &Request<B>) -> WsResult<(String, Arc<Endpoint>, Vec<Option<String>>)> {
        if self.state() != ServerState::Running {
            return Err(WsError::invalid_state("server is not accepting connections"));
        }
        let accept_key = upgrade::validate_upgrade_request(req)?;
        let path = req.uri().path();
        let (endpoint, path_match) = self
            .endpoints
            .resolve(path)
            .ok_or_else(|| WsError::no_endpoint(path))?;
        if !self.connections.has_capacity() {
            return Err(WsError::connection_limit(format!(
                "server is at capacity ({} connections)",
                self.connections.len()
            )));
        }
        Ok((accept_key, endpoint, path_match))
    }

    fn handle_request(self: &Arc<Self>, mut req: Request<Incoming>, remote_addr: SocketAddr) -> Response<Full<Bytes>> {
        let (accept_key, endpoint, path_match) = match self.accept(&req) {
            Ok(accepted) => accepted,
            Err(err) => {
                let reason = upgrade::rejection_reason(&err);
                warn!(%remote_addr, path = %req.uri().path(), reason, error = %err, "Rejected handshake");
                socketry_telemetry::record_handshake_rejected(reason);
                if matches!(err, WsError::ConnectionLimitReached(_)) {
                    self.connections.record_rejected();
                }
                return upgrade::rejection(&err);
            }
        };

        let on_upgrade = hyper::upgrade::on(&mut req);
        let info = ConnectionInfo {
            remote_addr,
            path: req.uri().path().to_string(),
            query: req.uri().query().map(str::to_string),
            headers: req.headers().clone(),
            path_match,
        };

        let server = Arc::clone(self);
        let token = self.tracker.track();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    server
                        .run_connection(TokioIo::new(upgraded), endpoint, info)
                        .await;
                }
                Err(err) => warn!(%remote_addr, error = %err, "Upgrade failed"),
            }
            drop(token);
        });

        upgrade::switching_protocols(&accept_key)
    }

    #[instrument(skip_all, fields(remote_addr = %info.remote_addr, path = %info.path))]
    async fn run_connection<S>(&self, io: S, endpoint: Arc<Endpoint>, info: ConnectionInfo)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut ws = WebSocketStream::from_raw_socket(
            io,
            Role::Server,
            Some(self.config.websocket().to_tungstenite()),
        )
        .await;

        let conn = Arc::new(Connection::new(info, Arc::downgrade(&endpoint)));
        if let Err(err) = self.connections.add(Arc::clone(&conn)) {
            warn!(connection_id = %conn.id(), error = %err, "Dropping upgraded connection");
            socketry_telemetry::record_handshake_rejected(upgrade::rejection_reason(&err));
            let frame = CloseFrame::new(CloseCode::TryAgainLater, "server is at capacity");
            if let Err(err) = ws.close(Some(frame.into())).await {
                debug!(error = %err, "Failed to send close frame");
            }
            return;
        }
        if let Err(err) = endpoint.registry().add(Arc::clone(&conn)) {
            debug!(error = %err, "Endpoint registry refused connection");
        }
        socketry_telemetry::record_connection_opened();

        // stop() may have taken its snapshot before this connection was added.
        if self.state() != ServerState::Running {
            conn.close(CloseCode::GoingAway, "server shutting down");
        }

        Driver::new(
            Arc::clone(&conn),
            endpoint.handlers().clone(),
            endpoint.pattern(),
            self.config.close_timeout(),
        )
        .run(ws)
        .await;

        self.connections.remove(conn.id());
        endpoint.registry().remove(conn.id());
        socketry_telemetry::record_connection_closed();
    }
}
