//! The per-connection driver task.
//!
//! One driver owns the socket of one connection. It runs the read path
//! (dispatching `on_message` in wire order) and the drain loop (writing
//! queued sends one at a time) in a single `select!` loop, so handler
//! invocations and send callbacks of a connection never run concurrently
//! and everything a handler enqueues is queued before the next callback of
//! that connection runs.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::OptionFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep, Sleep};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, instrument, trace, warn};

use crate::connection::{Connection, Next, SendCallback};
use crate::endpoint::Handlers;
use crate::error::{CloseCode, WsError, WsResult};
use crate::message::Message;

type WsSink<S> = SplitSink<WebSocketStream<S>, tungstenite::Message>;

/// An in-flight write. It owns the sink and hands it back when done.
type WriteFuture<S> = Pin<Box<dyn Future<Output = (WsSink<S>, WsResult<()>)> + Send>>;

fn write<S>(mut sink: WsSink<S>, frame: tungstenite::Message) -> WriteFuture<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Box::pin(async move {
        let result = sink.send(frame).await.map_err(WsError::from);
        (sink, result)
    })
}

/// Flush the codec's queued close reply and shut the write half.
fn finish<S>(mut sink: WsSink<S>) -> WriteFuture<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Box::pin(async move {
        let result = sink.close().await.map_err(WsError::from);
        (sink, result)
    })
}

/// How a connection ended.
#[derive(Debug)]
enum Outcome {
    /// The close handshake completed.
    Closed { code: u16, reason: String },
    /// The transport or protocol failed.
    Failed(WsError),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs one connection from `on_open` to `on_close`/`on_error`.
pub(crate) struct Driver {
    conn: Arc<Connection>,
    handlers: Handlers,
    endpoint: String,
    close_timeout: Duration,
}

impl Driver {
    pub(crate) fn new(
        conn: Arc<Connection>,
        handlers: Handlers,
        endpoint: impl Into<String>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            handlers,
            endpoint: endpoint.into(),
            close_timeout,
        }
    }

    /// Drive the connection until it is closed or fails.
    ///
    /// On return the connection is `Closed` and every unsent entry has been
    /// failed. The ending is reported once, through `on_close` for a
    /// completed close handshake or `on_error` for a failure. A panicking
    /// handler or callback adds its own `on_error` call beforehand, so a
    /// panic followed by a clean close reports both.
    #[instrument(
        name = "connection",
        skip_all,
        fields(connection_id = %self.conn.id(), endpoint = %self.endpoint)
    )]
    pub(crate) async fn run<S>(self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        debug!(remote_addr = %self.conn.remote_addr(), "Connection opened");

        let mut in_flight_cb = None;
        let outcome = self.drive(ws, &mut in_flight_cb).await;

        if let Some(cb) = in_flight_cb {
            self.guarded("send callback", move || {
                cb(Err(WsError::connection_closed(None, "connection closed during write")));
            });
        }
        for entry in self.conn.mark_closed() {
            entry.reject("connection closed before the message was sent");
        }

        match outcome {
            Outcome::Closed { code, reason } => {
                debug!(code, reason = %reason, "Connection closed");
                self.dispatch_close(code, &reason);
            }
            Outcome::Failed(err) => {
                warn!(error = %err, code = err.code(), "Connection failed");
                self.dispatch_error(&err);
            }
        }
    }

    async fn drive<S>(&self, ws: WebSocketStream<S>, in_flight_cb: &mut Option<SendCallback>) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = ws.split();
        let mut sink = Some(sink);
        let mut writing: Option<WriteFuture<S>> = None;
        let mut close_deadline: Option<Pin<Box<Sleep>>> = None;
        let mut local_close: Option<(u16, String)> = None;
        let mut peer_close: Option<(u16, String)> = None;
        let mut finishing = false;
        let mut reading = true;

        self.conn.mark_open();
        if let Some(on_open) = self.handlers.on_open.clone() {
            self.guarded("on_open", || on_open(&self.conn));
        }

        loop {
            // Drain loop: start the next write when none is in flight.
            if writing.is_none() {
                if let Some(s) = sink.take() {
                    if peer_close.is_some() {
                        finishing = true;
                        close_deadline.get_or_insert_with(|| Box::pin(sleep(self.close_timeout)));
                        writing = Some(finish(s));
                    } else {
                        match self.conn.next_outbound() {
                            Next::Write(entry) => {
                                *in_flight_cb = entry.on_complete;
                                writing = Some(write(s, entry.message.into()));
                            }
                            Next::Close(frame) => {
                                local_close = Some((frame.code, frame.reason.to_string()));
                                close_deadline = Some(Box::pin(sleep(self.close_timeout)));
                                writing = Some(write(s, Message::Close(Some(frame)).into()));
                            }
                            Next::Idle => sink = Some(s),
                        }
                    }
                }
            }

            tokio::select! {
                Some((s, result)) = OptionFuture::from(writing.as_mut()) => {
                    writing = None;
                    sink = Some(s);
                    self.conn.write_finished();

                    if finishing {
                        if let Err(err) = result {
                            debug!(error = %err, "Close flush failed after handshake");
                        }
                        let (code, reason) = peer_close
                            .take()
                            .or_else(|| local_close.take())
                            .unwrap_or((CloseCode::NoStatus.as_u16(), String::new()));
                        return Outcome::Closed { code, reason };
                    }

                    let failed = result.as_ref().err().map(ToString::to_string);
                    socketry_telemetry::record_message_sent(failed.is_none());
                    if let Some(cb) = in_flight_cb.take() {
                        let cb_result = match &failed {
                            None => Ok(()),
                            Some(reason) => Err(WsError::send_failed(reason.clone())),
                        };
                        self.guarded("send callback", move || cb(cb_result));
                    }
                    match result {
                        Err(err) if err.is_fatal() => return Outcome::Failed(err),
                        Err(err) => debug!(error = %err, "Write failed, connection kept"),
                        Ok(()) => {}
                    }
                }
                Some(()) = OptionFuture::from(close_deadline.as_mut()) => {
                    return Outcome::Failed(WsError::timeout(format!(
                        "close handshake not completed within {:?}",
                        self.close_timeout
                    )));
                }
                frame = stream.next(), if reading => match frame {
                    Some(Ok(frame)) => {
                        if let Some(close) = self.handle_frame(frame) {
                            peer_close = Some(close);
                            reading = false;
                        }
                    }
                    Some(Err(err)) => {
                        let err = WsError::from(err);
                        // A frame is never cut short: only an idle sink gets the status.
                        if let (None, None, Some(s)) = (&writing, &local_close, sink.as_mut()) {
                            self.send_failure_status(s, &err).await;
                        }
                        return Outcome::Failed(err);
                    }
                    None => {
                        if let Some((code, reason)) = local_close.take() {
                            return Outcome::Closed { code, reason };
                        }
                        return Outcome::Failed(WsError::transport(
                            "peer closed the socket without a close frame",
                        ));
                    }
                },
                () = self.conn.wait_for_work(), if writing.is_none() && sink.is_some() => {}
                else => return Outcome::Failed(WsError::internal("driver has nothing left to wait on")),
            }
        }
    }

    /// Best-effort close frame telling the peer why reading stopped.
    async fn send_failure_status<S>(&self, sink: &mut WsSink<S>, err: &WsError)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let code = err.close_code_for_peer();
        if !code.is_sendable() {
            return;
        }
        let frame = Message::close(code, code.to_string()).into();
        match tokio::time::timeout(self.close_timeout, sink.send(frame)).await {
            Ok(Ok(())) => debug!(code = code.as_u16(), "Sent failure close"),
            Ok(Err(e)) => debug!(error = %e, "Failure close not sent"),
            Err(_) => debug!("Failure close timed out"),
        }
    }

    /// Dispatch one inbound frame. Returns the peer's close status when the
    /// frame starts or completes the close handshake.
    fn handle_frame(&self, frame: tungstenite::Message) -> Option<(u16, String)> {
        let message = match Message::try_from(frame) {
            Ok(message) => message,
            Err(err) => {
                trace!(error = %err, "Ignoring raw frame");
                return None;
            }
        };

        match message {
            Message::Text(_) | Message::Binary(_) => {
                socketry_telemetry::record_message_received(&self.endpoint);
                trace!(opcode = %message.opcode(), size = message.size(), "Message received");
                if let Some(on_message) = self.handlers.on_message.clone() {
                    self.guarded("on_message", || on_message(&self.conn, message));
                }
                None
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!(opcode = %message.opcode(), "Control frame");
                None
            }
            Message::Close(frame) => {
                let (code, reason) = frame.map_or_else(
                    || (CloseCode::NoStatus.as_u16(), String::new()),
                    |f| (f.code, f.reason.into_owned()),
                );
                debug!(code, "Peer sent close");
                if let Some(dropped) = self.conn.begin_closing(None) {
                    for entry in dropped {
                        entry.reject("peer closed the connection");
                    }
                }
                Some((code, reason))
            }
        }
    }

    /// Run user code, turning a panic into an application error that is
    /// reported to `on_error` and closes the connection with 1011.
    fn guarded(&self, what: &str, f: impl FnOnce()) {
        let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) else {
            return;
        };
        let err = WsError::application(format!("{what} panicked: {}", panic_message(payload.as_ref())));
        error!(error = %err, "Handler panicked");
        self.dispatch_error(&err);
        self.conn.close(CloseCode::InternalError, "internal error");
    }

    fn dispatch_error(&self, err: &WsError) {
        if let Some(on_error) = &self.handlers.on_error {
            if panic::catch_unwind(AssertUnwindSafe(|| on_error(&self.conn, err))).is_err() {
                error!("on_error handler panicked");
            }
        }
    }

    fn dispatch_close(&self, code: u16, reason: &str) {
        if let Some(on_close) = &self.handlers.on_close {
            if panic::catch_unwind(AssertUnwindSafe(|| on_close(&self.conn, code, reason))).is_err() {
                error!("on_close handler panicked");
            }
        }
    }
}
