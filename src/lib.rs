//! mjpeg-player - live MJPEG streaming core
//!
//! Transcodes tagged decoded frames to JPEG per stream and fans the packets
//! out to browser clients over WebSocket, multiplexed with metadata and
//! error notices.

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod shutdown;
pub mod stats;
pub mod stream;
pub mod transport;
pub mod web;

// Re-exports
pub use config::Config;
pub use error::{ErrorNotice, Severity};
pub use stream::{StreamManager, StreamRegistry, StreamSpec};
pub use transport::{Connection, ConnectionConfig, ConnectionHandle};
