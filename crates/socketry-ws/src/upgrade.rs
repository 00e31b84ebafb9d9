//! HTTP upgrade handshake (RFC 6455 §4.2).
//!
//! The server validates each upgrade request, resolves its endpoint and
//! answers with either `101 Switching Protocols` or a plain-text error
//! response. Rejected requests never produce a connection.

use base64::Engine;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use sha1::{Digest, Sha1};

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

fn header_str<'a, B>(request: &'a Request<B>, name: impl header::AsHeaderName) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// `Connection` is a token list; `keep-alive, Upgrade` is valid.
fn has_upgrade_token<B>(request: &Request<B>) -> bool {
    header_str(request, header::CONNECTION).is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    })
}

fn has_websocket_upgrade<B>(request: &Request<B>) -> bool {
    header_str(request, header::UPGRADE).is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate a WebSocket upgrade request.
///
/// Returns the accept key if valid, or an error describing why it's invalid.
pub fn validate_upgrade_request<B>(request: &Request<B>) -> WsResult<String> {
    if request.method() != Method::GET {
        return Err(WsError::not_websocket(format!(
            "method must be GET, got {}",
            request.method()
        )));
    }

    if !has_upgrade_token(request) {
        return Err(WsError::not_websocket("missing Connection: Upgrade header"));
    }

    if !has_websocket_upgrade(request) {
        return Err(WsError::not_websocket("missing Upgrade: websocket header"));
    }

    let key = header_str(request, SEC_WEBSOCKET_KEY)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| WsError::not_websocket("missing Sec-WebSocket-Key header"))?;

    if header_str(request, SEC_WEBSOCKET_VERSION).map(str::trim) != Some("13") {
        return Err(WsError::not_websocket(
            "missing or invalid Sec-WebSocket-Version header (must be 13)",
        ));
    }

    Ok(compute_accept_key(key))
}

/// The `101 Switching Protocols` response for an accepted handshake.
pub fn switching_protocols(accept_key: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(accept_key) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

/// HTTP status used to reject a handshake that failed with `err`.
pub fn rejection_status(err: &WsError) -> StatusCode {
    match err {
        WsError::NoEndpoint { .. } => StatusCode::NOT_FOUND,
        WsError::ConnectionLimitReached(_) | WsError::InvalidState(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        WsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Short label for metrics and logs describing why a handshake was rejected.
pub fn rejection_reason(err: &WsError) -> &'static str {
    match err {
        WsError::NotWebSocketRequest { .. } => "not_websocket",
        WsError::NoEndpoint { .. } => "no_endpoint",
        WsError::ConnectionLimitReached(_) => "capacity",
        WsError::InvalidState(_) => "stopping",
        _ => "other",
    }
}

/// A plain-text error response for a rejected handshake.
///
/// The response asks the client to close the socket; no connection is
/// created for it.
pub fn rejection(err: &WsError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
    *response.status_mut() = rejection_status(err);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
