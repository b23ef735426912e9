//! WebSocket message framing
//!
//! Maps outbound message kinds onto WebSocket frames.

use crate::error::WriteError;
use axum::extract::ws::Message;
use bytes::Bytes;
use std::fmt;

/// Kind of an outbound WebSocket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// JPEG payload
    Binary,
    /// Metadata or serialized error notice
    Text,
    /// Keepalive
    Ping,
    /// Shutdown
    Close,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Binary => write!(f, "Binary"),
            MessageKind::Text => write!(f, "Text"),
            MessageKind::Ping => write!(f, "Ping"),
            MessageKind::Close => write!(f, "Close"),
        }
    }
}

/// Build the frame for `kind` carrying `payload`.
///
/// Close frames carry no status code; their payload is ignored.
pub fn frame(kind: MessageKind, payload: Bytes) -> Result<Message, WriteError> {
    match kind {
        MessageKind::Binary => Ok(Message::Binary(payload)),
        MessageKind::Text => {
            let text = String::from_utf8(payload.to_vec()).map_err(|_| WriteError::InvalidText)?;
            Ok(Message::Text(text.into()))
        }
        MessageKind::Ping => Ok(Message::Ping(payload)),
        MessageKind::Close => Ok(Message::Close(None)),
    }
}

/// Kind of an inbound or recorded frame, if it is one we emit
pub fn kind_of(message: &Message) -> Option<MessageKind> {
    match message {
        Message::Binary(_) => Some(MessageKind::Binary),
        Message::Text(_) => Some(MessageKind::Text),
        Message::Ping(_) => Some(MessageKind::Ping),
        Message::Close(_) => Some(MessageKind::Close),
        Message::Pong(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_is_framed_as_binary() {
        let message = frame(MessageKind::Binary, Bytes::from_static(&[1, 2])).expect("frame");
        match message {
            Message::Binary(data) => assert_eq!(&data[..], &[1, 2]),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn text_must_be_utf8() {
        assert!(frame(MessageKind::Text, Bytes::from_static(b"{\"a\":1}")).is_ok());
        assert!(matches!(
            frame(MessageKind::Text, Bytes::from_static(&[0xFF, 0xFE])),
            Err(WriteError::InvalidText)
        ));
    }

    #[test]
    fn close_frame_has_no_status() {
        let message = frame(MessageKind::Close, Bytes::new()).expect("frame");
        assert!(matches!(message, Message::Close(None)));
        assert_eq!(kind_of(&message), Some(MessageKind::Close));
    }
}
