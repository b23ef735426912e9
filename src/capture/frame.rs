//! Decoded frame data structure
//!
//! Frames from every source share one broadcast feed; the stream tag says
//! which logical stream a frame belongs to.

use crate::encode::PixelFormat;
use bytes::Bytes;
use std::fmt;
use tokio::sync::broadcast;

/// Shared feed of decoded frames, one receiver per transcoder
pub type FrameFeed = broadcast::Sender<DecodedFrame>;

/// Create a frame feed retaining up to `capacity` frames per lagging receiver
pub fn frame_feed(capacity: usize) -> FrameFeed {
    let (sender, _) = broadcast::channel(capacity);
    sender
}

/// A decoded picture from an upstream source
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Logical stream this frame belongs to
    pub stream_tag: i64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Layout of `data`
    pub format: PixelFormat,

    /// Packed pixel data, reference counted across receivers
    pub data: Bytes,

    /// Frame sequence number within its stream
    pub sequence: u64,

    /// Decode timestamp
    pub timestamp: std::time::Instant,
}

impl DecodedFrame {
    pub fn new(stream_tag: i64, width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            stream_tag,
            width,
            height,
            format,
            data,
            sequence: 0,
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

impl fmt::Display for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(tag={}, {}x{} {:?}, {} bytes, seq={})",
            self.stream_tag,
            self.width,
            self.height,
            self.format,
            self.data.len(),
            self.sequence
        )
    }
}
