//! Prometheus metrics shared by hubs, connections and transcoders.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Cloneable metric handles; clones update the same counters
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Connections currently attached to a hub
    pub connections_active: IntGauge,
    /// Connections ever attached
    pub connections_total: IntCounter,
    /// Connections evicted because their media queue was full
    pub slow_consumers: IntCounter,
    /// Connections that ended on a socket write failure
    pub write_failures: IntCounter,
    /// Frames read from the shared feed by any transcoder
    pub frames_received: IntCounter,
    /// Frames discarded because they belong to another stream
    pub frames_skipped: IntCounter,
    /// Encoded packets handed to hubs
    pub packets_published: IntCounter,
    /// Transcoder sessions ended by a caught panic
    pub transcoder_panics: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_active = IntGauge::new(
            "mjpeg_player_connections",
            "Current number of connections",
        )?;
        let connections_total = IntCounter::new(
            "mjpeg_player_connections_total",
            "Total connections attached to a stream",
        )?;
        let slow_consumers = IntCounter::new(
            "mjpeg_player_slow_consumers_total",
            "Connections evicted because their media queue was full",
        )?;
        let write_failures = IntCounter::new(
            "mjpeg_player_write_failures_total",
            "Connections closed after a socket write failure",
        )?;
        let frames_received = IntCounter::new(
            "mjpeg_player_frames_received_total",
            "Decoded frames read from the shared feed",
        )?;
        let frames_skipped = IntCounter::new(
            "mjpeg_player_frames_skipped_total",
            "Decoded frames discarded by stream tag",
        )?;
        let packets_published = IntCounter::new(
            "mjpeg_player_packets_published_total",
            "JPEG packets published to hubs",
        )?;
        let transcoder_panics = IntCounter::new(
            "mjpeg_player_transcoder_panics_total",
            "Transcoder sessions ended by a runtime failure",
        )?;

        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(slow_consumers.clone()))?;
        registry.register(Box::new(write_failures.clone()))?;
        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_skipped.clone()))?;
        registry.register(Box::new(packets_published.clone()))?;
        registry.register(Box::new(transcoder_panics.clone()))?;

        Ok(Self {
            registry,
            connections_active,
            connections_total,
            slow_consumers,
            write_failures,
            frames_received,
            frames_skipped,
            packets_published,
            transcoder_panics,
        })
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            log::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("connections_active", &self.connections_active.get())
            .field("packets_published", &self.packets_published.get())
            .finish()
    }
}
