//! Frame transcoding to motion-JPEG
//!
//! The codec contract lives in `codec`, the turbojpeg backend in `jpeg` and
//! the per-stream filter loop in `transcoder`.

pub mod codec;
pub mod jpeg;
pub mod transcoder;

pub use codec::{
    target_dimensions, CodecDescriptor, CodecId, CodecLibrary, PixelFormat, Rational,
    TARGET_HEIGHT,
};
pub use jpeg::{JpegConfig, JpegLibrary};
pub use transcoder::Transcoder;
