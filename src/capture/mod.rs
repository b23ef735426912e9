//! Decoded frame sources
//!
//! Upstream decoders publish onto a shared [`FrameFeed`]; `pattern` is a
//! synthetic source used when no decoder is attached.

pub mod frame;
pub mod pattern;

pub use frame::{frame_feed, DecodedFrame, FrameFeed};
pub use pattern::{PatternSource, PatternStream};
