//! Messages as handlers see them.
//!
//! A [`Message`] is one complete application-level unit: the frame codec
//! reassembles fragmented frames before a message reaches a handler, so
//! handlers never see continuation frames.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::error::{CloseCode, WsError, WsResult};

/// Frame opcode of a message (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// UTF-8 text (0x1).
    Text,
    /// Raw bytes (0x2).
    Binary,
    /// Close handshake (0x8).
    Close,
    /// Ping (0x9).
    Ping,
    /// Pong (0xA).
    Pong,
}

impl Opcode {
    /// The wire value of this opcode.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Whether this opcode carries application data.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// One complete message, or a control frame.
///
/// Messages are immutable once received and are handed to handlers by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Ping; the codec answers it on its own.
    Ping(Vec<u8>),
    /// Pong.
    Pong(Vec<u8>),
    /// Close handshake frame; `None` when the peer sent no status.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Binary message.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Ping with `data` as payload.
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::Ping(data.into())
    }

    /// Pong with `data` as payload.
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::Pong(data.into())
    }

    /// Close frame with a status.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// The opcode this message is sent with.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
            Self::Ping(_) => Opcode::Ping,
            Self::Pong(_) => Opcode::Pong,
            Self::Close(_) => Opcode::Close,
        }
    }

    /// `true` for [`Message::Text`].
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// `true` for [`Message::Binary`].
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// `true` for [`Message::Close`].
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Text or binary, i.e. something `on_message` receives.
    pub fn is_data(&self) -> bool {
        self.opcode().is_data()
    }

    /// The text, for text messages.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the raw payload bytes.
    ///
    /// Close messages yield an empty slice; use [`Message::close_frame`].
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b,
            Self::Close(_) => &[],
        }
    }

    /// Code and reason of a close frame.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match self {
            Self::Close(frame) => frame.as_ref(),
            _ => None,
        }
    }

    /// Take the text out of a text message.
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert the message into its payload bytes.
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b,
            Self::Close(_) => Vec::new(),
        }
    }

    /// Parse a text message as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> WsResult<T> {
        let text = self
            .as_text()
            .ok_or_else(|| WsError::DecodeFailed(format!("expected text, got {}", self.opcode())))?;
        serde_json::from_str(text).map_err(|e| WsError::DecodeFailed(e.to_string()))
    }

    /// Serialize `value` into a text message.
    pub fn from_json<T: Serialize>(value: &T) -> WsResult<Self> {
        serde_json::to_string(value)
            .map(Self::Text)
            .map_err(|e| WsError::EncodeFailed(e.to_string()))
    }

    /// Payload size in bytes.
    ///
    /// For close messages this is the encoded size of code plus reason.
    pub fn size(&self) -> usize {
        match self {
            Self::Close(Some(frame)) => 2 + frame.reason.len(),
            other => other.payload().len(),
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Binary(b.to_vec())
    }
}

impl TryFrom<tungstenite::Message> for Message {
    type Error = WsError;

    /// Raw frames only appear when writing, never from a reader.
    fn try_from(msg: tungstenite::Message) -> WsResult<Self> {
        Ok(match msg {
            tungstenite::Message::Text(s) => Self::Text(s.to_string()),
            tungstenite::Message::Binary(b) => Self::Binary(b.to_vec()),
            tungstenite::Message::Ping(b) => Self::Ping(b.to_vec()),
            tungstenite::Message::Pong(b) => Self::Pong(b.to_vec()),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(CloseFrame::from)),
            tungstenite::Message::Frame(_) => {
                return Err(WsError::protocol_error("unexpected raw frame"))
            }
        })
    }
}

impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Self::Text(s.into()),
            Message::Binary(b) => Self::Binary(b.into()),
            Message::Ping(b) => Self::Ping(b.into()),
            Message::Pong(b) => Self::Pong(b.into()),
            Message::Close(frame) => {
                Self::Close(frame.map(tungstenite::protocol::CloseFrame::from))
            }
        }
    }
}

/// Status code and reason of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close code.
    pub code: u16,
    /// UTF-8 reason, at most 123 bytes on the wire.
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Frame for a registered status code.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: Cow::Owned(reason.into()),
        }
    }

    /// The code as a [`CloseCode`], unless it is private-use.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl From<tungstenite::protocol::CloseFrame> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: Cow::Owned(frame.reason.to_string()),
        }
    }
}

impl From<CloseFrame> for tungstenite::protocol::CloseFrame {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.into_owned().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_message_opcode() {
        assert_eq!(Message::text("a").opcode(), Opcode::Text);
        assert_eq!(Message::binary(vec![1]).opcode(), Opcode::Binary);
        assert_eq!(Message::ping(vec![]).opcode(), Opcode::Ping);
        assert_eq!(Message::pong(vec![]).opcode(), Opcode::Pong);
        assert_eq!(
            Message::close(CloseCode::Normal, "").opcode(),
            Opcode::Close
        );
        assert_eq!(Opcode::Pong.as_u8(), 0xA);
        assert!(!Opcode::Ping.is_data());
    }

    #[test]
    fn test_message_text() {
        let msg = Message::text("hello");
        assert!(msg.is_text());
        assert!(msg.is_data());
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.payload(), b"hello");
        assert_eq!(msg.size(), 5);
    }

    #[test]
    fn test_message_close_size() {
        let msg = Message::close(CloseCode::GoingAway, "bye");
        assert!(msg.is_close());
        assert_eq!(msg.size(), 5);
        assert_eq!(msg.payload(), b"");
        let frame = msg.close_frame().unwrap();
        assert_eq!(frame.close_code(), Some(CloseCode::GoingAway));
    }

    #[test]
    fn test_message_json() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Reading {
            sensor: String,
            value: i32,
        }

        let data = Reading {
            sensor: "ir".into(),
            value: 42,
        };
        let msg = Message::from_json(&data).unwrap();
        let parsed: Reading = msg.json().unwrap();
        assert_eq!(parsed, data);

        let err = Message::binary(vec![1]).json::<Reading>().unwrap_err();
        assert!(err.to_string().contains("expected text, got binary"));
    }

    #[test]
    fn test_message_into_payload() {
        assert_eq!(Message::text("hi").into_payload(), b"hi".to_vec());
        assert_eq!(Message::binary(vec![7, 8]).into_payload(), vec![7, 8]);
        assert!(Message::Close(None).into_payload().is_empty());
    }

    #[test]
    fn test_tungstenite_conversion() {
        let wire: tungstenite::Message = Message::text("ping me").into();
        assert!(wire.is_text());
        let back = Message::try_from(wire).unwrap();
        assert_eq!(back.as_text(), Some("ping me"));

        let wire: tungstenite::Message = Message::close(CloseCode::Normal, "done").into();
        let back = Message::try_from(wire).unwrap();
        let frame = back.close_frame().unwrap();
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "done");
    }
}
