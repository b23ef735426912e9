//! Shared state for the HTTP layer

use crate::config::Config;
use crate::stats::Metrics;
use crate::stream::StreamRegistry;
use crate::transport::ConnectionConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State handed to every request handler
#[derive(Clone)]
pub struct SharedState {
    /// Configuration
    pub config: Arc<Config>,

    /// Streams that can be watched
    pub registry: Arc<StreamRegistry>,

    /// Prometheus metrics
    pub metrics: Metrics,

    /// Settings applied to each upgraded connection
    pub connection: ConnectionConfig,

    /// Server start time
    pub start_time: Instant,
}

impl SharedState {
    pub fn new(config: Arc<Config>, registry: Arc<StreamRegistry>, metrics: Metrics) -> Self {
        let connection = config.connection_config();
        Self {
            config,
            registry,
            metrics,
            connection,
            start_time: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Connections currently attached to a hub
    pub fn connection_count(&self) -> i64 {
        self.metrics.connections_active.get()
    }
}
