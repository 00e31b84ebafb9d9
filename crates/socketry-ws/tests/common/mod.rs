//! Shared helpers for the end-to-end tests: a server on an ephemeral port
//! and a `tokio-tungstenite` client.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use socketry_ws::{CloseFrame, Message, ServerConfig, ServerConfigBuilder, WsResult, WsServer};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Loopback config with short timeouts.
pub fn config() -> ServerConfigBuilder {
    ServerConfig::builder()
        .addr("127.0.0.1:0")
        .worker_threads(2)
        .close_timeout(Duration::from_secs(2))
        .shutdown_timeout(Duration::from_secs(3))
}

/// A server running on the test runtime.
pub struct TestServer {
    pub server: WsServer,
    pub addr: SocketAddr,
    handle: JoinHandle<WsResult<()>>,
}

impl TestServer {
    /// Start `server` and wait until it listens.
    pub async fn start(server: WsServer) -> Self {
        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        let addr = server.ready().await.expect("server failed to start");
        Self {
            server,
            addr,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Connect a client to `path`.
    pub async fn connect(&self, path: &str) -> Client {
        let (client, response) = tokio_tungstenite::connect_async(self.url(path))
            .await
            .expect("handshake failed");
        assert_eq!(response.status(), http::StatusCode::SWITCHING_PROTOCOLS);
        client
    }

    /// Connect and wait until the server has registered the connection.
    pub async fn connect_registered(&self, path: &str) -> Client {
        let before = self.server.registry().stats().accepted;
        let client = self.connect(path).await;
        let registry = self.server.registry();
        eventually(|| registry.stats().accepted > before).await;
        client
    }

    /// Stop the server and wait for `run` to return.
    pub async fn shutdown(self) {
        self.server.stop();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Poll `condition` until it holds, failing after a few seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `fut` with the standard test timeout.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out")
}

pub async fn send_text(client: &mut Client, text: &str) {
    client
        .send(Message::text(text).into())
        .await
        .expect("client send failed");
}

/// The next message from the server.
pub async fn recv(client: &mut Client) -> Message {
    let frame = within(client.next())
        .await
        .expect("stream ended")
        .expect("client read failed");
    Message::try_from(frame).expect("unexpected raw frame")
}

pub async fn recv_text(client: &mut Client) -> String {
    match recv(client).await {
        Message::Text(text) => text,
        other => panic!("expected text, got {other:?}"),
    }
}

/// Read until the server's close frame, then keep reading so the client's
/// automatic reply is flushed and the handshake completes.
pub async fn recv_close(client: &mut Client) -> CloseFrame {
    let frame = loop {
        match recv(client).await {
            Message::Close(Some(frame)) => break frame,
            Message::Close(None) => panic!("close frame without status"),
            _ => {}
        }
    };
    while let Some(Ok(_)) = within(client.next()).await {}
    frame
}
