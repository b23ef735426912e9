//! Error types and client-facing error notices

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Numeric codes carried by [`ErrorNotice`]
pub mod codes {
    /// Peer closed the socket or stopped answering pings
    pub const PEER_GONE: u16 = 1;
    /// No MJPEG encoder available in the codec library
    pub const ENCODER_NOT_FOUND: u16 = 2;
    /// Encoder context could not be opened
    pub const CODEC_OPEN_FAILED: u16 = 3;
    /// Destination frame buffer could not be allocated
    pub const FRAME_ALLOC_FAILED: u16 = 4;
    /// Scaling context could not be built
    pub const SCALER_INIT_FAILED: u16 = 5;
}

/// Severity of an error notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, the connection keeps running
    Warning,
    /// The connection is torn down once the notice is flushed
    Fatal,
}

impl Severity {
    pub fn is_terminal(self) -> bool {
        matches!(self, Severity::Fatal)
    }
}

/// Structured error pushed to browser clients as a text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub code: u16,
    pub level: Severity,
    pub message: String,
}

impl ErrorNotice {
    pub fn new(code: u16, level: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            level,
            message: message.into(),
        }
    }

    pub fn warning(code: u16, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, message)
    }

    pub fn fatal(code: u16, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Fatal, message)
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Socket write failures. Every variant is fatal for the connection.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("write deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("text payload is not valid UTF-8")]
    InvalidText,

    #[error("connection already closed")]
    Closed,
}

/// Codec library errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder not found: {0}")]
    EncoderNotFound(String),

    #[error("Failed to open codec: {0}")]
    Open(String),

    #[error("Frame allocation failed: {0}")]
    Alloc(String),

    #[error("Unsupported scaling: {0}")]
    Scaler(String),

    #[error("Scaling failed: {0}")]
    Scale(String),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Stream registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream not found: {0}")]
    NotFound(String),

    #[error("Stream already exists: {0}")]
    AlreadyExists(String),

    #[error("Hub for stream {0} is no longer running")]
    HubClosed(String),
}
