//! Engine errors and close status codes.
//!
//! [`WsError`] variants fall into four families:
//!
//! - **Transport**: socket-level failures ([`WsError::Io`], [`WsError::Transport`],
//!   [`WsError::Timeout`]).
//! - **Handshake**: the upgrade request could not be accepted
//!   ([`WsError::NotWebSocketRequest`], [`WsError::HandshakeFailed`],
//!   [`WsError::NoEndpoint`], [`WsError::ConnectionLimitReached`]).
//! - **Protocol**: malformed or oversized frames ([`WsError::ProtocolError`],
//!   [`WsError::Tungstenite`]).
//! - **Application**: a handler panicked ([`WsError::Application`]).

use std::fmt;
use thiserror::Error;

/// Result alias used across the engine.
pub type WsResult<T> = Result<T, WsError>;

/// Everything that can go wrong between accept and close.
#[derive(Debug, Error)]
pub enum WsError {
    /// Missing or wrong upgrade headers.
    #[error("not a WebSocket upgrade request: {reason}")]
    NotWebSocketRequest {
        /// Which header was wrong.
        reason: String,
    },

    /// The upgrade was accepted but could not be completed.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// No registered endpoint matches the request path.
    #[error("no endpoint matches path: {path}")]
    NoEndpoint {
        /// The request path that was not matched.
        path: String,
    },

    /// An endpoint pattern is not a valid regular expression.
    #[error("invalid endpoint pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why the pattern failed to compile.
        reason: String,
    },

    /// The connection is closing or closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// The peer's status, when it sent one.
        code: Option<u16>,
        /// Why the send or operation was refused.
        reason: String,
    },

    /// The transport rejected a queued write.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// A payload did not deserialize.
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// A value did not serialize.
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    /// `max_connections` was reached.
    #[error("connection limit reached: {0}")]
    ConnectionLimitReached(String),

    /// Malformed frames or an invalid opcode sequence.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The transport failed outside of an I/O call (e.g. the upgrade was lost).
    #[error("transport error: {0}")]
    Transport(String),

    /// A handshake or close did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A handler panicked while processing an event.
    #[error("handler failed: {0}")]
    Application(String),

    /// The server is not in a state that allows the requested transition.
    #[error("invalid server state: {0}")]
    InvalidState(String),

    /// Failed to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An engine invariant broke.
    #[error("internal error: {0}")]
    Internal(String),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame codec failed, including oversized payloads.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tungstenite::Error),
}

impl WsError {
    /// The request is not an upgrade we can accept.
    pub fn not_websocket(reason: impl Into<String>) -> Self {
        Self::NotWebSocketRequest {
            reason: reason.into(),
        }
    }

    /// The handshake broke down after validation.
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }

    /// No endpoint pattern matched `path`.
    pub fn no_endpoint(path: impl Into<String>) -> Self {
        Self::NoEndpoint { path: path.into() }
    }

    /// The connection is closing or closed.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// The transport rejected a write.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// The registry is at its connection limit.
    pub fn connection_limit(reason: impl Into<String>) -> Self {
        Self::ConnectionLimitReached(reason.into())
    }

    /// The peer broke the framing rules.
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    /// The socket failed outside an I/O call.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    /// A handshake or close ran out of time.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout(reason.into())
    }

    /// User code failed.
    pub fn application(reason: impl Into<String>) -> Self {
        Self::Application(reason.into())
    }

    /// The server cannot make the requested transition.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// A bug in the engine.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// The peer's status for [`WsError::ConnectionClosed`].
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            _ => None,
        }
    }

    /// A stable numeric code for this error, suitable for logs and metrics.
    ///
    /// Codes are grouped by family: 1xx handshake, 2xx connection state,
    /// 3xx protocol, 4xx transport, 5xx application and server.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotWebSocketRequest { .. } => 100,
            Self::HandshakeFailed(_) => 101,
            Self::NoEndpoint { .. } => 102,
            Self::ConnectionLimitReached(_) => 103,
            Self::ConnectionClosed { .. } => 200,
            Self::SendFailed(_) => 201,
            Self::ProtocolError(_) => 300,
            Self::Tungstenite(_) => 301,
            Self::DecodeFailed(_) => 302,
            Self::EncodeFailed(_) => 303,
            Self::Io(_) => 400,
            Self::Transport(_) => 401,
            Self::Timeout(_) => 402,
            Self::Application(_) => 500,
            Self::InvalidPattern { .. } => 501,
            Self::InvalidState(_) => 502,
            Self::Bind { .. } => 503,
            Self::Internal(_) => 504,
        }
    }

    /// Whether the connection this error happened on has to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_)
                | Self::ConnectionClosed { .. }
                | Self::ConnectionLimitReached(_)
                | Self::ProtocolError(_)
                | Self::Tungstenite(_)
                | Self::Io(_)
                | Self::Transport(_)
                | Self::Timeout(_)
                | Self::Application(_)
                | Self::Internal(_)
        )
    }

    /// The status sent to the peer when this error tears a connection down.
    ///
    /// Transport failures map to 1006, which [`CloseCode::is_sendable`]
    /// rejects.
    pub fn close_code_for_peer(&self) -> CloseCode {
        match self {
            Self::Tungstenite(tungstenite::Error::Capacity(_)) => CloseCode::MessageTooBig,
            Self::ProtocolError(_) | Self::Tungstenite(tungstenite::Error::Protocol(_)) => {
                CloseCode::Protocol
            }
            Self::DecodeFailed(_) => CloseCode::InvalidPayload,
            Self::ConnectionLimitReached(_) => CloseCode::TryAgainLater,
            Self::Application(_) | Self::Internal(_) => CloseCode::InternalError,
            _ => CloseCode::Abnormal,
        }
    }
}

/// Status code carried by a close frame (RFC 6455 §7.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// 1000: the purpose of the connection was fulfilled.
    Normal = 1000,
    /// 1001: the endpoint is going away, e.g. a server stopping.
    GoingAway = 1001,
    /// 1002: the peer violated the protocol.
    Protocol = 1002,
    /// 1003: the peer sent a data type we cannot accept.
    Unsupported = 1003,
    /// 1005: the close frame carried no status. Never sent.
    NoStatus = 1005,
    /// 1006: the socket dropped without a close frame. Never sent.
    Abnormal = 1006,
    /// 1007: a text payload was not valid UTF-8.
    InvalidPayload = 1007,
    /// 1008: a generic policy violation.
    PolicyViolation = 1008,
    /// 1009: a message exceeded the size limit.
    MessageTooBig = 1009,
    /// 1010: the client expected an extension we did not negotiate.
    ExtensionRequired = 1010,
    /// 1011: a handler failed while processing the connection.
    InternalError = 1011,
    /// 1012: the server is restarting.
    ServiceRestart = 1012,
    /// 1013: the server is overloaded.
    TryAgainLater = 1013,
    /// 1014: an upstream returned an invalid response.
    BadGateway = 1014,
    /// 1015: the TLS handshake failed. Never sent.
    TlsHandshake = 1015,
}

impl CloseCode {
    const ALL: [Self; 15] = [
        Self::Normal,
        Self::GoingAway,
        Self::Protocol,
        Self::Unsupported,
        Self::NoStatus,
        Self::Abnormal,
        Self::InvalidPayload,
        Self::PolicyViolation,
        Self::MessageTooBig,
        Self::ExtensionRequired,
        Self::InternalError,
        Self::ServiceRestart,
        Self::TryAgainLater,
        Self::BadGateway,
        Self::TlsHandshake,
    ];

    /// Look up a registered code. Private-use codes (4000-4999) yield `None`.
    pub fn from_u16(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_u16() == code)
    }

    /// The numeric status.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this code may appear in a close frame on the wire.
    pub fn is_sendable(self) -> bool {
        !matches!(self, Self::NoStatus | Self::Abnormal | Self::TlsHandshake)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::GoingAway => "GoingAway",
            Self::Protocol => "Protocol",
            Self::Unsupported => "Unsupported",
            Self::NoStatus => "NoStatus",
            Self::Abnormal => "Abnormal",
            Self::InvalidPayload => "InvalidPayload",
            Self::PolicyViolation => "PolicyViolation",
            Self::MessageTooBig => "MessageTooBig",
            Self::ExtensionRequired => "ExtensionRequired",
            Self::InternalError => "InternalError",
            Self::ServiceRestart => "ServiceRestart",
            Self::TryAgainLater => "TryAgainLater",
            Self::BadGateway => "BadGateway",
            Self::TlsHandshake => "TlsHandshake",
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}
