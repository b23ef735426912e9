//! Per-stream fan-out hub
//!
//! One hub task per stream. It owns the handles of every connection watching
//! the stream, copies each encoded packet into their media queues and starts
//! the stream's transcoder when the first connection arrives.

use crate::encode::CodecDescriptor;
use crate::error::{ErrorNotice, StreamError};
use crate::stats::Metrics;
use crate::transport::connection::recv_or_pending;
use crate::transport::ConnectionHandle;
use bytes::Bytes;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Packets buffered between a transcoder and its hub
pub const HUB_MEDIA_CAPACITY: usize = 16;

/// Starts the stream's transcoder; called at most once
pub type TranscoderStart = Box<dyn FnOnce() + Send>;

/// Metadata sent to each connection when it joins a stream
#[derive(Debug, Serialize)]
struct StreamInfo<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    stream: &'a str,
    width: u32,
    height: u32,
    format: &'static str,
}

/// JSON greeting describing the stream's output
pub fn greeting(stream_id: &str, target: &CodecDescriptor) -> Result<String, serde_json::Error> {
    serde_json::to_string(&StreamInfo {
        kind: "stream_info",
        stream: stream_id,
        width: target.width,
        height: target.height,
        format: "mjpeg",
    })
}

/// Producer side of a hub, stored in the registry
#[derive(Debug, Clone)]
pub struct HubHandle {
    stream_id: Arc<str>,
    registrations: mpsc::Sender<ConnectionHandle>,
    errors: mpsc::Sender<ErrorNotice>,
}

impl HubHandle {
    /// Attach a connection to this stream
    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), StreamError> {
        self.registrations
            .send(connection)
            .await
            .map_err(|_| StreamError::HubClosed(self.stream_id.to_string()))
    }

    /// Sender for notices relayed to every attached connection
    pub fn error_sender(&self) -> mpsc::Sender<ErrorNotice> {
        self.errors.clone()
    }

    /// True once the hub task has exited
    pub fn is_closed(&self) -> bool {
        self.registrations.is_closed()
    }
}

/// Receiving side of a hub, consumed by [`Hub::new`]
pub struct HubInputs {
    registrations: mpsc::Receiver<ConnectionHandle>,
    media: mpsc::Receiver<Bytes>,
    errors: mpsc::Receiver<ErrorNotice>,
}

/// Create the queues of a hub. The returned sender is the media intake and
/// belongs to the transcoder; the hub exits once it is dropped.
pub fn channel(stream_id: &str) -> (HubHandle, HubInputs, mpsc::Sender<Bytes>) {
    let (registrations_tx, registrations_rx) = mpsc::channel(8);
    let (media_tx, media_rx) = mpsc::channel(HUB_MEDIA_CAPACITY);
    let (errors_tx, errors_rx) = mpsc::channel(8);

    let handle = HubHandle {
        stream_id: Arc::from(stream_id),
        registrations: registrations_tx,
        errors: errors_tx,
    };
    let inputs = HubInputs {
        registrations: registrations_rx,
        media: media_rx,
        errors: errors_rx,
    };
    (handle, inputs, media_tx)
}

pub struct Hub {
    stream_id: String,
    registrations: Option<mpsc::Receiver<ConnectionHandle>>,
    media: mpsc::Receiver<Bytes>,
    errors: Option<mpsc::Receiver<ErrorNotice>>,
    connections: Vec<ConnectionHandle>,
    greeting: String,
    starter: Option<TranscoderStart>,
    metrics: Metrics,
}

impl Hub {
    pub fn new(
        stream_id: impl Into<String>,
        inputs: HubInputs,
        greeting: String,
        starter: TranscoderStart,
        metrics: Metrics,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            registrations: Some(inputs.registrations),
            media: inputs.media,
            errors: Some(inputs.errors),
            connections: Vec::new(),
            greeting,
            starter: Some(starter),
            metrics,
        }
    }

    /// Serve the stream until its media intake closes, or until
    /// registrations close before anyone subscribed
    pub async fn run(mut self) {
        debug!("Hub for stream {} started", self.stream_id);

        let reason = loop {
            tokio::select! {
                registration = recv_or_pending(&mut self.registrations) => match registration {
                    Some(connection) => self.attach(connection),
                    None => {
                        self.registrations = None;
                        if self.starter.is_some() {
                            break "registrations closed before any subscriber";
                        }
                    }
                },
                media = self.media.recv() => match media {
                    Some(payload) => self.publish(payload),
                    None => {
                        self.flush_notices();
                        break "media intake closed";
                    }
                },
                notice = recv_or_pending(&mut self.errors) => match notice {
                    Some(notice) => self.broadcast_notice(notice),
                    None => self.errors = None,
                },
            }
        };

        let remaining = self.connections.len();
        self.metrics.connections_active.sub(remaining as i64);
        self.connections.clear();
        info!(
            "Hub for stream {} stopped ({}), released {} connections",
            self.stream_id, reason, remaining
        );
    }

    fn attach(&mut self, connection: ConnectionHandle) {
        self.prune_closed();
        if connection.try_send_metadata(self.greeting.clone()).is_err() {
            debug!("Greeting for connection {} dropped", connection.id());
        }
        self.metrics.connections_active.inc();
        self.metrics.connections_total.inc();
        info!(
            "Connection {} joined stream {} ({} watching)",
            connection.id(),
            self.stream_id,
            self.connections.len() + 1
        );
        self.connections.push(connection);

        if let Some(start) = self.starter.take() {
            info!("Starting transcoder for stream {}", self.stream_id);
            start();
        }
    }

    fn publish(&mut self, payload: Bytes) {
        let before = self.connections.len();
        let stream_id = &self.stream_id;
        let metrics = &self.metrics;
        self.connections
            .retain(|connection| match connection.try_send_media(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Connection {} on stream {} is too slow, evicting",
                        connection.id(),
                        stream_id
                    );
                    metrics.slow_consumers.inc();
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} left stream {}", connection.id(), stream_id);
                    false
                }
            });
        let evicted = before - self.connections.len();
        if evicted > 0 {
            self.metrics.connections_active.sub(evicted as i64);
        }
    }

    /// Drop connections whose writer has already exited
    fn prune_closed(&mut self) {
        let before = self.connections.len();
        let stream_id = &self.stream_id;
        self.connections.retain(|connection| {
            if connection.is_closed() {
                debug!("Connection {} left stream {}", connection.id(), stream_id);
                false
            } else {
                true
            }
        });
        let gone = before - self.connections.len();
        if gone > 0 {
            self.metrics.connections_active.sub(gone as i64);
        }
    }

    fn broadcast_notice(&mut self, notice: ErrorNotice) {
        self.prune_closed();
        debug!(
            "Stream {}: relaying error {} to {} connections",
            self.stream_id,
            notice.code,
            self.connections.len()
        );
        for connection in &self.connections {
            if connection.try_send_error(notice.clone()).is_err() {
                debug!("Notice for connection {} dropped", connection.id());
            }
        }
    }

    fn flush_notices(&mut self) {
        while let Some(notice) = self.errors.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.broadcast_notice(notice);
        }
    }
}
