//! Configuration management for mjpeg-player

use crate::encode::{CodecDescriptor, PixelFormat, Rational};
use crate::stream::StreamSpec;
use crate::transport::{ConnectionConfig, MAX_MESSAGE_SIZE, MEDIA_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener
    pub http: HttpConfig,

    /// WebSocket connection tuning
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// JPEG encoding
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Decoded frame source
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Streams served by this instance
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address
    pub host: String,

    /// HTTP port
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Deadline for a single outbound write
    #[serde(default = "default_write_wait_ms")]
    pub write_wait_ms: u64,

    /// Liveness timeout for inbound traffic; pings go out at 9/10 of it
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,

    /// Largest accepted inbound message
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Packets buffered per connection before it counts as a slow consumer
    #[serde(default = "default_media_queue_capacity")]
    pub media_queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            write_wait_ms: default_write_wait_ms(),
            pong_wait_ms: default_pong_wait_ms(),
            max_message_size: default_max_message_size(),
            media_queue_capacity: default_media_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Test pattern frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Frames retained for a lagging transcoder
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream id, the last segment of the upgrade path
    pub id: String,

    /// Tag of this stream's frames on the shared feed
    pub tag: i64,

    /// Decoded frame width
    pub width: u32,

    /// Decoded frame height
    pub height: u32,

    /// Decoded frame layout
    #[serde(default)]
    pub pixel_format: PixelFormat,

    /// Source frame rate, sets the codec time base
    #[serde(default = "default_fps")]
    pub fps: u32,
}

impl StreamConfig {
    pub fn to_spec(&self) -> StreamSpec {
        StreamSpec {
            id: self.id.clone(),
            tag: self.tag,
            source: CodecDescriptor::new(
                self.width,
                self.height,
                self.pixel_format,
                Rational::per_frame(self.fps),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
            },
            websocket: WebSocketConfig::default(),
            encoding: EncodingConfig::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            streams: default_streams(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.streams.is_empty() {
            return Err("At least one stream must be configured".into());
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if stream.id.is_empty() || stream.id.contains('/') {
                return Err(format!("Invalid stream id {:?}", stream.id).into());
            }
            if !ids.insert(stream.id.as_str()) {
                return Err(format!("Duplicate stream id {:?}", stream.id).into());
            }
            if stream.width == 0 || stream.height == 0 {
                return Err(format!("Stream {} dimensions must be non-zero", stream.id).into());
            }
            if stream.pixel_format.bytes_per_pixel().is_none() {
                return Err(format!("Stream {} must use a packed pixel format", stream.id).into());
            }
        }

        if !(1..=100).contains(&self.encoding.jpeg_quality) {
            return Err("JPEG quality must be between 1 and 100".into());
        }

        if self.websocket.media_queue_capacity == 0 || self.source.feed_capacity == 0 {
            return Err("Queue capacities must be non-zero".into());
        }

        if self.websocket.max_message_size == 0 {
            return Err("WebSocket max_message_size must be non-zero".into());
        }

        let connection = self.connection_config();
        if connection.write_wait.is_zero() || connection.ping_period.is_zero() {
            return Err("WebSocket timeouts must be non-zero".into());
        }
        if connection.ping_period >= connection.pong_wait {
            return Err("Ping period must be shorter than the pong wait".into());
        }

        Ok(())
    }

    /// Connection settings derived from the `websocket` section
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            write_wait: Duration::from_millis(self.websocket.write_wait_ms),
            max_message_size: self.websocket.max_message_size,
            media_queue_capacity: self.websocket.media_queue_capacity,
            ..ConnectionConfig::default()
        }
        .with_pong_wait(Duration::from_millis(self.websocket.pong_wait_ms))
    }
}


fn default_write_wait_ms() -> u64 {
    10_000
}

fn default_pong_wait_ms() -> u64 {
    60_000
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_media_queue_capacity() -> usize {
    MEDIA_QUEUE_CAPACITY
}

fn default_jpeg_quality() -> u8 {
    75
}

fn default_fps() -> u32 {
    15
}

fn default_feed_capacity() -> usize {
    32
}

fn default_streams() -> Vec<StreamConfig> {
    vec![
        StreamConfig {
            id: "camera-1".to_string(),
            tag: 1,
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Rgb24,
            fps: default_fps(),
        },
        StreamConfig {
            id: "camera-2".to_string(),
            tag: 2,
            width: 640,
            height: 360,
            pixel_format: PixelFormat::Rgb24,
            fps: default_fps(),
        },
    ]
}
