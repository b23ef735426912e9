//! WebSocket transport
//!
//! Message framing and the per-connection outbound multiplexer.

pub mod codec;
pub mod connection;

pub use codec::MessageKind;
pub use connection::{
    read_pump, Connection, ConnectionConfig, ConnectionHandle, ExitReason, MAX_MESSAGE_SIZE,
    MEDIA_QUEUE_CAPACITY, PING_PERIOD, PONG_WAIT, WRITE_WAIT,
};
