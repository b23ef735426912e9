//! Synthetic test-pattern source
//!
//! Publishes moving gradient frames for each configured stream tag, standing
//! in for a real decoder.

use crate::capture::frame::{DecodedFrame, FrameFeed};
use crate::encode::PixelFormat;
use bytes::Bytes;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One stream produced by the pattern source
#[derive(Debug, Clone)]
pub struct PatternStream {
    pub tag: i64,
    pub width: u32,
    pub height: u32,
}

/// Generates RGB frames for several tags onto one feed
#[derive(Debug, Clone)]
pub struct PatternSource {
    streams: Vec<PatternStream>,
    fps: u32,
}

impl PatternSource {
    pub fn new(streams: Vec<PatternStream>, fps: u32) -> Self {
        Self {
            streams,
            fps: fps.max(1),
        }
    }

    /// Render frame `sequence` of `stream`
    pub fn render(stream: &PatternStream, sequence: u64) -> DecodedFrame {
        let width = stream.width as usize;
        let height = stream.height as usize;
        let offset = (sequence * 4) as usize;
        let bar = if width == 0 { 0 } else { offset % width };

        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                if x >= bar && x < bar + 8 {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    // Red ramp scrolls with the sequence and wraps every frame width.
                    let r = ((x + offset) * 255 / width.max(1) % 256) as u8;
                    let g = (y * 255 / height.max(1)) as u8;
                    let b = (stream.tag.unsigned_abs() % 4 * 64) as u8;
                    data.extend_from_slice(&[r, g, b]);
                }
            }
        }

        DecodedFrame::new(
            stream.tag,
            stream.width,
            stream.height,
            PixelFormat::Rgb24,
            Bytes::from(data),
        )
        .with_sequence(sequence)
    }

    /// Publish frames until `running` is cleared. Blocking.
    pub fn run(self, feed: FrameFeed, running: Arc<AtomicBool>) {
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);
        info!(
            "Pattern source started: {} streams at {} fps",
            self.streams.len(),
            self.fps
        );

        let mut sequence = 0u64;
        while running.load(Ordering::Relaxed) {
            let started = Instant::now();
            for stream in &self.streams {
                // No receiver yet simply means nobody is watching.
                if feed.send(Self::render(stream, sequence)).is_err() && sequence % 300 == 0 {
                    debug!("No transcoder subscribed for tag {}", stream.tag);
                }
            }
            sequence = sequence.wrapping_add(1);

            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        info!("Pattern source stopped after {} frames", sequence);
    }
}
