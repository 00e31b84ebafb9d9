//! Upgraded WebSocket connections.
//!
//! A [`Connection`] is shared through `Arc` between the server's
//! registries, its endpoint, user code and the driver task that owns the
//! socket. All sends go through a per-connection FIFO queue; the driver
//! writes one entry at a time, so sends issued in program order reach the
//! wire in that order regardless of which thread issued them.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use http::HeaderMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::{CloseCode, WsError, WsResult};
use crate::message::{CloseFrame, Message};

/// A unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded but `on_open` has not run yet. Sends are queued.
    Connecting,
    /// Fully open.
    Open,
    /// A close handshake is in progress. Sends fail.
    Closing,
    /// The driver has finished.
    Closed,
}

impl ConnectionState {
    /// Whether new sends are accepted in this state.
    pub fn accepts_sends(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Longest close reason that fits a control frame next to the status code.
pub const MAX_CLOSE_REASON: usize = 123;

fn wire_close_frame(code: u16, mut reason: String) -> CloseFrame {
    let sendable = match CloseCode::from_u16(code) {
        Some(known) if known.is_sendable() => code,
        Some(CloseCode::NoStatus) => CloseCode::Normal.as_u16(),
        Some(_) => CloseCode::InternalError.as_u16(),
        None if (3000..5000).contains(&code) => code,
        None => CloseCode::Normal.as_u16(),
    };
    if sendable != code {
        debug!(requested = code, sent = sendable, "Replacing close code that cannot be sent");
    }
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    CloseFrame {
        code: sendable,
        reason: reason.into(),
    }
}

/// Completion callback for a queued send.
pub type SendCallback = Box<dyn FnOnce(WsResult<()>) + Send + 'static>;

/// One entry of the outbound queue.
pub(crate) struct OutboundEntry {
    pub(crate) message: Message,
    pub(crate) on_complete: Option<SendCallback>,
}

impl OutboundEntry {
    /// Complete the entry with `ConnectionClosed` without writing it.
    pub(crate) fn reject(self, reason: &str) {
        socketry_telemetry::record_send_dropped();
        if let Some(cb) = self.on_complete {
            cb(Err(WsError::connection_closed(None, reason)));
        }
    }
}

/// What the driver should write next.
pub(crate) enum Next {
    Write(OutboundEntry),
    Close(CloseFrame),
    Idle,
}

struct Outbound {
    queue: VecDeque<OutboundEntry>,
    in_flight: bool,
    state: ConnectionState,
    pending_close: Option<CloseFrame>,
}

/// Request metadata captured during the handshake.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionInfo {
    pub(crate) remote_addr: SocketAddr,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) path_match: Vec<Option<String>>,
}

/// An upgraded WebSocket connection.
///
/// `send` and `close` never block and may be called from any thread,
/// including from inside handlers and send callbacks.
pub struct Connection {
    id: ConnectionId,
    info: ConnectionInfo,
    endpoint: Weak<Endpoint>,
    outbound: Mutex<Outbound>,
    wake: Notify,
}

impl Connection {
    pub(crate) fn new(info: ConnectionInfo, endpoint: Weak<Endpoint>) -> Self {
        Self {
            id: ConnectionId::new(),
            info,
            endpoint,
            outbound: Mutex::new(Outbound {
                queue: VecDeque::new(),
                in_flight: false,
                state: ConnectionState::Connecting,
                pending_close: None,
            }),
            wake: Notify::new(),
        }
    }

    /// The connection's unique ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// The raw query string, if the request had one.
    pub fn query(&self) -> Option<&str> {
        self.info.query.as_deref()
    }

    /// The handshake request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.info.headers
    }

    /// Capture groups of the endpoint pattern; index 0 is the whole path.
    pub fn path_match(&self) -> &[Option<String>] {
        &self.info.path_match
    }

    /// A single capture group of the endpoint pattern.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.info.path_match.get(index)?.as_deref()
    }

    /// The endpoint this connection was routed to, while it is still alive.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.endpoint.upgrade()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.outbound.lock().state
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of queued sends not yet handed to the transport.
    pub fn queued(&self) -> usize {
        self.outbound.lock().queue.len()
    }

    /// Whether a write is currently in progress.
    pub fn is_writing(&self) -> bool {
        self.outbound.lock().in_flight
    }

    /// Queue a message for sending.
    pub fn send(&self, message: impl Into<Message>) {
        self.enqueue(message.into(), None);
    }

    /// Queue a message and get notified once it was written or dropped.
    ///
    /// The callback runs on this connection's driver after the write, or
    /// right away with [`WsError::ConnectionClosed`] if the connection is
    /// closing.
    pub fn send_with<F>(&self, message: impl Into<Message>, on_complete: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        self.enqueue(message.into(), Some(Box::new(on_complete)));
    }

    /// Queue a text message.
    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Message::Text(text.into()));
    }

    /// Queue a binary message.
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.send(Message::Binary(data.into()));
    }

    /// Serialize `value` as JSON and queue it as a text message.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::EncodeFailed`] if serialization fails.
    pub fn send_json<T: Serialize>(&self, value: &T) -> WsResult<()> {
        self.send(Message::from_json(value)?);
        Ok(())
    }

    /// Queue a ping with the given payload.
    pub fn ping(&self, payload: impl Into<Vec<u8>>) {
        self.send(Message::Ping(payload.into()));
    }

    /// Returns `true` if the message was queued.
    pub(crate) fn enqueue(&self, message: Message, on_complete: Option<SendCallback>) -> bool {
        let entry = OutboundEntry {
            message,
            on_complete,
        };

        if entry.message.is_close() {
            warn!(connection_id = %self.id, "Close frames must be sent with close()");
            socketry_telemetry::record_send_dropped();
            if let Some(cb) = entry.on_complete {
                cb(Err(WsError::protocol_error(
                    "close frames cannot be queued, use Connection::close",
                )));
            }
            return false;
        }

        let rejected = {
            let mut out = self.outbound.lock();
            if out.state.accepts_sends() {
                out.queue.push_back(entry);
                None
            } else {
                Some(entry)
            }
        };

        match rejected {
            None => {
                self.wake.notify_one();
                true
            }
            Some(entry) => {
                debug!(connection_id = %self.id, "Dropping send on closing connection");
                entry.reject("connection is closing");
                false
            }
        }
    }

    /// Start a graceful close.
    ///
    /// Queued sends that have not been handed to the transport fail with
    /// [`WsError::ConnectionClosed`]; a write already in progress finishes.
    /// The close frame is written next and the driver waits for the peer's
    /// reply. Calling `close` again has no effect.
    ///
    /// Codes reserved for local reporting (1005, 1006, 1015) and codes
    /// outside the registered and private ranges are replaced before they
    /// reach the wire; reasons are cut to [`MAX_CLOSE_REASON`] bytes.
    pub fn close(&self, code: impl Into<u16>, reason: impl Into<String>) {
        let frame = wire_close_frame(code.into(), reason.into());
        let Some(dropped) = self.begin_closing(Some(frame)) else {
            return;
        };
        debug!(connection_id = %self.id, dropped = dropped.len(), "Closing connection");
        self.wake.notify_one();
        for entry in dropped {
            entry.reject("connection closed before the message was sent");
        }
    }

    /// Move to `Closing`. Returns the entries that will never be written, or
    /// `None` if the connection was already closing.
    pub(crate) fn begin_closing(&self, frame: Option<CloseFrame>) -> Option<Vec<OutboundEntry>> {
        let mut out = self.outbound.lock();
        if !out.state.accepts_sends() {
            return None;
        }
        out.state = ConnectionState::Closing;
        out.pending_close = frame;
        Some(out.queue.drain(..).collect())
    }

    pub(crate) fn mark_open(&self) {
        let mut out = self.outbound.lock();
        if out.state == ConnectionState::Connecting {
            out.state = ConnectionState::Open;
        }
    }

    /// Move to `Closed`, returning whatever was still queued.
    pub(crate) fn mark_closed(&self) -> Vec<OutboundEntry> {
        let mut out = self.outbound.lock();
        out.state = ConnectionState::Closed;
        out.in_flight = false;
        out.pending_close = None;
        out.queue.drain(..).collect()
    }

    /// Pop the next thing to write and mark it in flight.
    pub(crate) fn next_outbound(&self) -> Next {
        let mut out = self.outbound.lock();
        if let Some(frame) = out.pending_close.take() {
            out.in_flight = true;
            return Next::Close(frame);
        }
        match out.queue.pop_front() {
            Some(entry) => {
                out.in_flight = true;
                Next::Write(entry)
            }
            None => Next::Idle,
        }
    }

    pub(crate) fn write_finished(&self) {
        self.outbound.lock().in_flight = false;
    }

    pub(crate) async fn wait_for_work(&self) {
        self.wake.notified().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.info.remote_addr)
            .field("path", &self.info.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn test_connection(path: &str) -> Arc<Connection> {
        let info = ConnectionInfo {
            remote_addr: "127.0.0.1:40000".parse().unwrap(),
            path: path.to_string(),
            query: Some("room=1".to_string()),
            headers: HeaderMap::new(),
            path_match: vec![Some(path.to_string())],
        };
        Arc::new(Connection::new(info, Weak::new()))
    }

    #[test]
    fn test_connection_id_unique_and_ordered() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_metadata_accessors() {
        let conn = test_connection("/echo");
        assert_eq!(conn.path(), "/echo");
        assert_eq!(conn.query(), Some("room=1"));
        assert_eq!(conn.capture(0), Some("/echo"));
        assert_eq!(conn.capture(1), None);
        assert!(conn.endpoint().is_none());
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_sends_are_queued_in_order() {
        let conn = test_connection("/echo");
        conn.send_text("a");
        conn.send_binary(vec![1]);
        conn.send("c");
        assert_eq!(conn.queued(), 3);

        let mut order = Vec::new();
        while let Next::Write(entry) = conn.next_outbound() {
            order.push(entry.message);
            conn.write_finished();
        }
        assert_eq!(
            order,
            vec![Message::text("a"), Message::binary(vec![1]), Message::text("c")]
        );
    }

    #[test]
    fn test_close_fails_queued_and_is_idempotent() {
        let conn = test_connection("/echo");
        conn.mark_open();

        let failed = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let failed = Arc::clone(&failed);
            conn.send_with("pending", move |result| {
                assert!(matches!(result, Err(WsError::ConnectionClosed { .. })));
                failed.fetch_add(1, Ordering::SeqCst);
            });
        }

        conn.close(CloseCode::Normal, "bye");
        conn.close(CloseCode::GoingAway, "again");
        assert_eq!(failed.load(Ordering::SeqCst), 3);
        assert_eq!(conn.state(), ConnectionState::Closing);

        match conn.next_outbound() {
            Next::Close(frame) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason, "bye");
            }
            _ => panic!("expected the close frame"),
        }
        assert!(matches!(conn.next_outbound(), Next::Idle));
    }

    fn queued_close(conn: &Connection) -> CloseFrame {
        match conn.next_outbound() {
            Next::Close(frame) => frame,
            _ => panic!("expected the close frame"),
        }
    }

    #[test]
    fn test_close_replaces_reserved_codes() {
        let cases = [
            (CloseCode::NoStatus.as_u16(), 1000),
            (CloseCode::Abnormal.as_u16(), 1011),
            (CloseCode::TlsHandshake.as_u16(), 1011),
            (999, 1000),
            (1004, 1000),
            (4001, 4001),
            (1013, 1013),
        ];
        for (requested, sent) in cases {
            let conn = test_connection("/echo");
            conn.close(requested, "x");
            assert_eq!(queued_close(&conn).code, sent, "requested {requested}");
        }
    }

    #[test]
    fn test_close_reason_is_cut_at_char_boundary() {
        let conn = test_connection("/echo");
        // 61 two-byte chars plus one three-byte char: 125 bytes.
        let reason = format!("{}€", "é".repeat(61));
        conn.close(CloseCode::Normal, reason);

        let frame = queued_close(&conn);
        assert_eq!(frame.reason.len(), 122);
        assert!(frame.reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_send_after_close_invokes_callback() {
        let conn = test_connection("/echo");
        conn.close(CloseCode::Normal, "");

        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = Arc::clone(&called);
        conn.send_with("late", move |result| {
            assert!(result.is_err());
            called_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(called.load(Ordering::SeqCst), 1);
        assert_eq!(conn.queued(), 0);
    }

    #[test]
    fn test_close_message_rejected_by_send() {
        let conn = test_connection("/echo");
        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_clone = Arc::clone(&rejected);
        conn.send_with(Message::close(CloseCode::Normal, ""), move |result| {
            assert!(matches!(result, Err(WsError::ProtocolError(_))));
            rejected_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(conn.queued(), 0);
        assert!(conn.state().accepts_sends());
    }

    #[test]
    fn test_send_json() {
        #[derive(Serialize)]
        struct Greeting<'a> {
            hello: &'a str,
        }

        let conn = test_connection("/json");
        conn.send_json(&Greeting { hello: "world" }).unwrap();
        match conn.next_outbound() {
            Next::Write(entry) => assert_eq!(entry.message.as_text(), Some(r#"{"hello":"world"}"#)),
            _ => panic!("expected a queued message"),
        }
        assert!(conn.is_writing());
    }
}
