//! Stream hubs and their lifecycle
//!
//! [`StreamManager`] creates one hub per configured stream and hands the
//! hub a starter that launches the transcoder on a blocking thread when the
//! first viewer arrives.

pub mod hub;
pub mod registry;

pub use hub::{Hub, HubHandle};
pub use registry::StreamRegistry;

use crate::capture::FrameFeed;
use crate::encode::{CodecDescriptor, CodecLibrary, Transcoder};
use crate::error::StreamError;
use crate::shutdown::ShutdownGroup;
use crate::stats::Metrics;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Description of one stream to serve
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Id used in the upgrade path
    pub id: String,
    /// Tag carried by this stream's frames on the shared feed
    pub tag: i64,
    /// Geometry of the decoded frames
    pub source: CodecDescriptor,
}

/// A stream added to the manager
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub id: String,
    pub hub: HubHandle,
    pub target: CodecDescriptor,
}

pub struct StreamManager<L: CodecLibrary> {
    library: Arc<L>,
    registry: Arc<StreamRegistry>,
    feed: Option<FrameFeed>,
    shutdown: ShutdownGroup,
    metrics: Metrics,
}

impl<L: CodecLibrary> StreamManager<L> {
    pub fn new(
        library: Arc<L>,
        registry: Arc<StreamRegistry>,
        feed: FrameFeed,
        metrics: Metrics,
    ) -> Self {
        Self {
            library,
            registry,
            feed: Some(feed),
            shutdown: ShutdownGroup::new(),
            metrics,
        }
    }

    pub fn registry(&self) -> Arc<StreamRegistry> {
        self.registry.clone()
    }

    /// Transcoder sessions (started or pending) not yet finished
    pub fn active_workers(&self) -> usize {
        self.shutdown.active()
    }

    /// Register a stream and spawn its hub. Must run inside a tokio runtime.
    pub fn add_stream(&self, spec: StreamSpec) -> Result<StreamHandle, StreamError> {
        let feed = self
            .feed
            .clone()
            .ok_or_else(|| StreamError::HubClosed(spec.id.clone()))?;
        let target = spec.source.target();
        let (hub_handle, inputs, media_tx) = hub::channel(&spec.id);

        let greeting = hub::greeting(&spec.id, &target).unwrap_or_else(|e| {
            warn!("Stream {}: greeting not serializable: {}", spec.id, e);
            String::from("{}")
        });

        let library = self.library.clone();
        let errors = hub_handle.error_sender();
        let guard = self.shutdown.enlist();
        let metrics = self.metrics.clone();
        let source = spec.source;
        let tag = spec.tag;
        let starter: hub::TranscoderStart = Box::new(move || {
            let transcoder = Transcoder::new(
                library,
                source,
                tag,
                feed.subscribe(),
                media_tx,
                errors,
                guard,
                metrics,
            );
            tokio::task::spawn_blocking(move || transcoder.run());
        });

        self.registry.insert(spec.id.clone(), hub_handle.clone())?;
        let hub = Hub::new(spec.id.clone(), inputs, greeting, starter, self.metrics.clone());
        tokio::spawn(hub.run());

        info!(
            "Stream {} (tag {}) added: {}x{} -> {}x{}",
            spec.id, spec.tag, spec.source.width, spec.source.height, target.width, target.height
        );
        Ok(StreamHandle {
            id: spec.id,
            hub: hub_handle,
            target,
        })
    }

    /// Stop accepting viewers, close the feed and wait up to `grace` for
    /// every transcoder to finish. Returns false if the wait timed out.
    ///
    /// Other holders of the feed sender must drop it too before transcoders
    /// can observe the closure.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let streams = self.registry.clear();
        self.feed = None;
        info!(
            "Shutting down {} streams, waiting for {} workers",
            streams,
            self.shutdown.active()
        );

        let group = self.shutdown;
        let waiter = tokio::task::spawn_blocking(move || group.wait());
        match tokio::time::timeout(grace, waiter).await {
            Ok(Ok(())) => {
                info!("All stream workers finished");
                true
            }
            Ok(Err(e)) => {
                warn!("Shutdown wait failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Stream workers still running after {:?}", grace);
                false
            }
        }
    }
}
