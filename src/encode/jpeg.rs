//! JPEG codec library using turbojpeg
//!
//! Scaling runs through `image`, encoding through turbojpeg with 4:2:0
//! chroma subsampling. Staging frames stay packed RGB; the `Yuvj420p`
//! target layout is produced by the compressor itself.

use crate::capture::DecodedFrame;
use crate::encode::codec::{
    CodecDescriptor, CodecId, CodecLibrary, EncoderInfo, EncoderParams, FrameEncoder,
    FrameScaler, Packet, PixelFormat, VideoFrame,
};
use crate::error::CodecError;
use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use turbojpeg::{Compressor, Subsamp};

/// JPEG library configuration
#[derive(Debug, Clone)]
pub struct JpegConfig {
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self { quality: 75 }
    }
}

/// turbojpeg-backed codec library
#[derive(Debug, Clone, Default)]
pub struct JpegLibrary {
    config: JpegConfig,
}

impl JpegLibrary {
    pub fn new(config: JpegConfig) -> Self {
        Self { config }
    }
}

impl CodecLibrary for JpegLibrary {
    type Encoder = JpegEncoder;
    type Scaler = JpegScaler;

    fn find_encoder(&self, id: CodecId) -> Result<EncoderInfo, CodecError> {
        match id {
            CodecId::Mjpeg => Ok(EncoderInfo {
                id,
                name: "turbojpeg",
                experimental: false,
            }),
        }
    }

    fn open_encoder(
        &self,
        info: &EncoderInfo,
        params: &EncoderParams,
    ) -> Result<JpegEncoder, CodecError> {
        let descriptor = params.descriptor;
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(CodecError::Open(format!(
                "{}: invalid dimensions {}x{}",
                info.name, descriptor.width, descriptor.height
            )));
        }
        let subsamp = match descriptor.pixel_format {
            PixelFormat::Yuvj420p => Subsamp::Sub2x2,
            other => {
                return Err(CodecError::Open(format!(
                    "{}: unsupported output format {:?}",
                    info.name, other
                )))
            }
        };

        let mut compressor =
            Compressor::new().map_err(|e| CodecError::Open(format!("{}: {}", info.name, e)))?;
        compressor.set_quality(self.config.quality as i32);
        compressor.set_subsamp(subsamp);

        log::debug!(
            "Opened {} encoder {}x{} quality={}",
            info.name,
            descriptor.width,
            descriptor.height,
            self.config.quality
        );

        Ok(JpegEncoder { compressor })
    }

    fn new_scaler(
        &self,
        src: &CodecDescriptor,
        dst: &CodecDescriptor,
    ) -> Result<JpegScaler, CodecError> {
        if src.pixel_format.bytes_per_pixel().is_none() {
            return Err(CodecError::Scaler(format!(
                "cannot read planar source format {:?}",
                src.pixel_format
            )));
        }
        if dst.pixel_format != PixelFormat::Yuvj420p && dst.pixel_format != PixelFormat::Rgb24 {
            return Err(CodecError::Scaler(format!(
                "cannot write destination format {:?}",
                dst.pixel_format
            )));
        }
        Ok(JpegScaler {
            filter: FilterType::CatmullRom,
            scratch: Vec::new(),
        })
    }

    fn alloc_frame(&self, descriptor: &CodecDescriptor) -> Result<VideoFrame, CodecError> {
        let size = (descriptor.width as usize)
            .checked_mul(descriptor.height as usize)
            .and_then(|pixels| pixels.checked_mul(3))
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                CodecError::Alloc(format!(
                    "invalid frame size {}x{}",
                    descriptor.width, descriptor.height
                ))
            })?;

        Ok(VideoFrame {
            width: descriptor.width,
            height: descriptor.height,
            format: PixelFormat::Rgb24,
            data: vec![0; size],
        })
    }
}

/// Bicubic scaler with pixel format conversion to packed RGB
pub struct JpegScaler {
    filter: FilterType,
    /// Reused for sources that need channel conversion
    scratch: Vec<u8>,
}

impl FrameScaler for JpegScaler {
    fn scale(&mut self, src: &DecodedFrame, dst: &mut VideoFrame) -> Result<(), CodecError> {
        if src.width == 0 || src.height == 0 {
            return Err(CodecError::Scale(format!("{}: empty source", src)));
        }
        let bpp = src
            .format
            .bytes_per_pixel()
            .ok_or_else(|| CodecError::Scale(format!("planar source {:?}", src.format)))?;
        let expected = src.width as usize * src.height as usize * bpp;
        if src.data.len() < expected {
            return Err(CodecError::Scale(format!(
                "{}: expected {} bytes",
                src, expected
            )));
        }

        let rgb: &[u8] = match src.format {
            PixelFormat::Rgb24 => &src.data[..expected],
            PixelFormat::Rgba => {
                to_rgb(&src.data[..expected], [0, 1, 2], &mut self.scratch);
                &self.scratch
            }
            PixelFormat::Bgra => {
                to_rgb(&src.data[..expected], [2, 1, 0], &mut self.scratch);
                &self.scratch
            }
            PixelFormat::Yuvj420p => {
                return Err(CodecError::Scale(format!("planar source {:?}", src.format)))
            }
        };

        if src.width == dst.width && src.height == dst.height {
            dst.data.copy_from_slice(rgb);
            return Ok(());
        }

        let view: ImageBuffer<Rgb<u8>, &[u8]> = ImageBuffer::from_raw(src.width, src.height, rgb)
            .ok_or_else(|| CodecError::Scale(format!("{}: buffer too small", src)))?;
        let resized = imageops::resize(&view, dst.width, dst.height, self.filter);
        dst.data.copy_from_slice(resized.as_raw());
        Ok(())
    }
}

fn to_rgb(packed: &[u8], order: [usize; 3], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(packed.len() / 4 * 3);
    for pixel in packed.chunks_exact(4) {
        out.extend_from_slice(&[pixel[order[0]], pixel[order[1]], pixel[order[2]]]);
    }
}

/// turbojpeg encoder; every input frame yields one packet
pub struct JpegEncoder {
    compressor: Compressor,
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Option<Packet>, CodecError> {
        let width = frame.width as usize;
        let image = turbojpeg::Image {
            pixels: frame.data.as_slice(),
            width,
            pitch: width * 3,
            height: frame.height as usize,
            format: turbojpeg::PixelFormat::RGB,
        };

        let compressed = self
            .compressor
            .compress_to_vec(image)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Some(Packet {
            data: Bytes::from(compressed),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::codec::Rational;

    fn gradient(width: u32, height: u32) -> Bytes {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 128]);
            }
        }
        Bytes::from(data)
    }

    #[test]
    fn transcodes_full_hd_to_capped_jpeg() {
        let library = JpegLibrary::default();
        let source = CodecDescriptor::new(1920, 1080, PixelFormat::Rgb24, Rational::new(1, 30));
        let target = source.target();

        let info = library.find_encoder(CodecId::Mjpeg).expect("encoder");
        let params = EncoderParams::for_encoder(&info, target);
        let mut encoder = library.open_encoder(&info, &params).expect("open");
        let mut scaler = library.new_scaler(&source, &target).expect("scaler");
        let mut dst = library.alloc_frame(&target).expect("alloc");

        let frame = DecodedFrame::new(1, 1920, 1080, PixelFormat::Rgb24, gradient(1920, 1080));
        scaler.scale(&frame, &mut dst).expect("scale");
        let packet = encoder.encode(&dst).expect("encode").expect("packet ready");

        assert_eq!(&packet.data[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory_with_format(&packet.data, image::ImageFormat::Jpeg)
            .expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (533, 300));
    }

    #[test]
    fn bgra_sources_are_swizzled_to_rgb() {
        let library = JpegLibrary::default();
        let source = CodecDescriptor::new(2, 1, PixelFormat::Bgra, Rational::new(1, 30));
        let target = source.target();
        let mut scaler = library.new_scaler(&source, &target).expect("scaler");
        let mut dst = library.alloc_frame(&target).expect("alloc");

        let data = Bytes::from_static(&[1, 2, 3, 255, 4, 5, 6, 255]);
        let frame = DecodedFrame::new(1, 2, 1, PixelFormat::Bgra, data);
        scaler.scale(&frame, &mut dst).expect("scale");
        assert_eq!(dst.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn short_frames_are_rejected() {
        let library = JpegLibrary::default();
        let source = CodecDescriptor::new(4, 4, PixelFormat::Rgb24, Rational::new(1, 30));
        let target = source.target();
        let mut scaler = library.new_scaler(&source, &target).expect("scaler");
        let mut dst = library.alloc_frame(&target).expect("alloc");

        let frame = DecodedFrame::new(1, 4, 4, PixelFormat::Rgb24, Bytes::from_static(&[0; 10]));
        assert!(scaler.scale(&frame, &mut dst).is_err());
    }

    #[test]
    fn empty_frames_are_rejected_before_resize() {
        let library = JpegLibrary::default();
        let source = CodecDescriptor::new(64, 48, PixelFormat::Rgb24, Rational::new(1, 30));
        let target = source.target();
        let mut scaler = library.new_scaler(&source, &target).expect("scaler");
        let mut dst = library.alloc_frame(&target).expect("alloc");

        for (width, height) in [(0, 48), (64, 0)] {
            let frame = DecodedFrame::new(1, width, height, PixelFormat::Rgb24, Bytes::new());
            assert!(matches!(
                scaler.scale(&frame, &mut dst),
                Err(CodecError::Scale(_))
            ));
        }
    }

    #[test]
    fn planar_sources_cannot_be_scaled() {
        let library = JpegLibrary::default();
        let source = CodecDescriptor::new(4, 4, PixelFormat::Yuvj420p, Rational::new(1, 30));
        assert!(library.new_scaler(&source, &source.target()).is_err());
    }

    #[test]
    fn zero_sized_frames_fail_allocation() {
        let library = JpegLibrary::default();
        let descriptor = CodecDescriptor::new(0, 300, PixelFormat::Yuvj420p, Rational::new(1, 30));
        assert!(matches!(
            library.alloc_frame(&descriptor),
            Err(CodecError::Alloc(_))
        ));
    }
}
