//! Codec library contract
//!
//! The transcoder only talks to codecs through these traits, so the JPEG
//! backend can be swapped or mocked.

use crate::capture::DecodedFrame;
use crate::error::CodecError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Height above which sources are downscaled
pub const TARGET_HEIGHT: u32 = 300;

/// Pixel format of every encoded stream
pub const TARGET_PIXEL_FORMAT: PixelFormat = PixelFormat::Yuvj420p;

/// Pixel layout of a frame or codec context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Rgba,
    Bgra,
    /// Full-range planar YUV 4:2:0, the JPEG output layout
    Yuvj420p,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for planar ones
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Yuvj420p => None,
        }
    }
}

/// Rational time base (seconds per tick)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// One tick per frame at `fps`
    pub fn per_frame(fps: u32) -> Self {
        Self::new(1, fps.max(1) as i32)
    }
}

/// Geometry and format of one side of a transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
}

impl CodecDescriptor {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat, time_base: Rational) -> Self {
        Self {
            width,
            height,
            pixel_format,
            time_base,
        }
    }

    /// Output descriptor for this source: capped height, same aspect ratio,
    /// fixed pixel format, same time base
    pub fn target(&self) -> CodecDescriptor {
        let (width, height) = target_dimensions(self.width, self.height);
        CodecDescriptor {
            width,
            height,
            pixel_format: TARGET_PIXEL_FORMAT,
            time_base: self.time_base,
        }
    }
}

/// Output dimensions for a `width`x`height` source.
///
/// Sources taller than [`TARGET_HEIGHT`] are scaled to that height with the
/// width rounded to preserve the aspect ratio; smaller ones pass through.
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    if height <= TARGET_HEIGHT {
        return (width, height);
    }
    let ratio = width as f64 / height as f64;
    let scaled = (TARGET_HEIGHT as f64 * ratio).round() as u32;
    (scaled.max(1), TARGET_HEIGHT)
}

/// Encoders the transcoder may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    Mjpeg,
}

impl CodecId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecId::Mjpeg => "mjpeg",
        }
    }
}

/// Standards compliance requested from the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compliance {
    #[default]
    Normal,
    Experimental,
}

/// Result of an encoder lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    pub id: CodecId,
    pub name: &'static str,
    pub experimental: bool,
}

/// Encoder context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderParams {
    pub descriptor: CodecDescriptor,
    pub compliance: Compliance,
}

impl EncoderParams {
    pub fn for_encoder(info: &EncoderInfo, descriptor: CodecDescriptor) -> Self {
        let compliance = if info.experimental {
            Compliance::Experimental
        } else {
            Compliance::Normal
        };
        Self {
            descriptor,
            compliance,
        }
    }
}

/// Reusable picture buffer owned by one transcoder
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// One encoded picture
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
}

/// Converts source frames into the destination buffer
pub trait FrameScaler {
    fn scale(&mut self, src: &DecodedFrame, dst: &mut VideoFrame) -> Result<(), CodecError>;
}

/// Turns destination frames into packets
pub trait FrameEncoder {
    /// `Ok(None)` means the encoder needs more input before a packet is ready
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<Packet>, CodecError>;
}

/// Codec library used by the transcoder
pub trait CodecLibrary: Send + Sync + 'static {
    type Encoder: FrameEncoder;
    type Scaler: FrameScaler;

    fn find_encoder(&self, id: CodecId) -> Result<EncoderInfo, CodecError>;

    fn open_encoder(
        &self,
        info: &EncoderInfo,
        params: &EncoderParams,
    ) -> Result<Self::Encoder, CodecError>;

    fn new_scaler(
        &self,
        src: &CodecDescriptor,
        dst: &CodecDescriptor,
    ) -> Result<Self::Scaler, CodecError>;

    fn alloc_frame(&self, descriptor: &CodecDescriptor) -> Result<VideoFrame, CodecError>;
}
