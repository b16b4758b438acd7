//! Transport-neutral frames and the boxed socket halves the pumps drive.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::TransportError;
use crate::payload::Payload;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent by an endpoint that is going away (server shutdown, page navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One discrete unit exchanged over the duplex socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Whether this is a ping/pong/close control frame.
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_))
    }
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal (1000) and going-away (1001) closures are expected.
    pub fn is_expected(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "close code {}", self.code)
        } else {
            write!(f, "close code {}: {}", self.code, self.reason)
        }
    }
}

/// An application message normalized to a single byte frame.
///
/// Raw bytes, strings, [`Payload`]s and JSON values all convert into this;
/// UTF-8 content goes out as a text frame, anything else as binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage(Bytes);

impl OutboundMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_frame(self) -> Frame {
        match String::from_utf8(self.0.to_vec()) {
            Ok(text) => Frame::Text(text),
            Err(_) => Frame::Binary(self.0),
        }
    }
}

impl From<Bytes> for OutboundMessage {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for OutboundMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for OutboundMessage {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Payload> for OutboundMessage {
    fn from(payload: Payload) -> Self {
        Self(Bytes::from(payload.to_bytes()))
    }
}

impl From<&Payload> for OutboundMessage {
    fn from(payload: &Payload) -> Self {
        Self(Bytes::from(payload.to_bytes()))
    }
}

impl From<serde_json::Value> for OutboundMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(Bytes::from(value.to_string()))
    }
}

/// Outbound half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An upgraded duplex socket, split into the halves the read and write pumps own.
pub struct Transport {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Transport {
    /// Wrap any frame sink/stream pair, e.g. an HTTP framework's upgraded socket.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Wrap a `tokio-tungstenite` socket (accepted or dialed).
    pub fn from_tungstenite<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));

        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => frame_from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Self::new(sink, stream)
    }

    /// Split into the raw halves.
    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

/// Raw `Message::Frame` values never surface while reading and are skipped.
fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(Bytes::from(data))),
        Message::Ping(data) => Some(Frame::Ping(Bytes::from(data))),
        Message::Pong(data) => Some(Frame::Pong(Bytes::from(data))),
        Message::Close(close) => Some(Frame::Close(close.map(|cf| CloseReason {
            code: u16::from(cf.code),
            reason: cf.reason.into_owned(),
        }))),
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_normalization() {
        let from_str = OutboundMessage::from("hello");
        let from_string = OutboundMessage::from("hello".to_string());
        let from_vec = OutboundMessage::from(b"hello".to_vec());
        assert_eq!(from_str, from_string);
        assert_eq!(from_str, from_vec);

        let payload = Payload::new().with("a", 1);
        assert_eq!(OutboundMessage::from(&payload).as_bytes(), br#"{"a":1}"#);
        assert_eq!(
            OutboundMessage::from(json!({"a": 1})).as_bytes(),
            br#"{"a":1}"#
        );
    }

    #[test]
    fn test_outbound_utf8_becomes_text_frame() {
        let frame = OutboundMessage::from("{\"x\":1}").into_frame();
        assert_eq!(frame, Frame::Text("{\"x\":1}".to_string()));

        let frame = OutboundMessage::from(vec![0xff, 0x00]).into_frame();
        assert!(matches!(frame, Frame::Binary(_)));
    }

    #[test]
    fn test_close_reason_expectations() {
        assert!(CloseReason::new(CLOSE_NORMAL, "").is_expected());
        assert!(CloseReason::new(CLOSE_GOING_AWAY, "bye").is_expected());
        assert!(!CloseReason::new(1002, "protocol").is_expected());
        assert!(!CloseReason::new(1011, "internal").is_expected());
    }

    #[test]
    fn test_message_conversion() {
        let close = Message::from(Frame::Close(Some(CloseReason::new(1000, "done"))));
        let back = frame_from_message(close).unwrap();
        assert_eq!(back, Frame::Close(Some(CloseReason::new(1000, "done"))));

        let ping = frame_from_message(Message::Ping(vec![1, 2])).unwrap();
        assert!(ping.is_control());
        assert!(!Frame::Text(String::new()).is_control());
    }
}
