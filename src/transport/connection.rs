//! Per-connection outbound multiplexer
//!
//! A [`Connection`] owns the write half of one WebSocket and the receiving
//! ends of its media, metadata and error queues. Its `run` loop is the only
//! writer of the socket, so frames never interleave. Producers hold a
//! [`ConnectionHandle`]; dropping every handle closes the media queue, which
//! is the planned way to end a connection.

use crate::error::{codes, ErrorNotice, WriteError};
use crate::transport::codec::{self, MessageKind};
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError, error::TrySendError};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Time allowed to write a message to the peer
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between two inbound messages (pongs included)
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period, must stay below [`PONG_WAIT`]
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// Maximum inbound message size
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Outbound media queue capacity
pub const MEDIA_QUEUE_CAPACITY: usize = 256;

/// Connection timing and queue sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub media_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: PING_PERIOD,
            max_message_size: MAX_MESSAGE_SIZE,
            media_queue_capacity: MEDIA_QUEUE_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// Set the liveness timeout; the ping period follows at 9/10 of it
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }
}

/// Why a connection's writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Media queue closed by its producers
    MediaClosed,
    /// A media or ping write failed or timed out
    WriteFailed,
    /// A fatal error notice was delivered
    TerminalNotice,
}

/// Producer side of a connection's queues
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    media: mpsc::Sender<Bytes>,
    metadata: mpsc::Sender<String>,
    errors: mpsc::Sender<ErrorNotice>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn try_send_media(&self, payload: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.media.try_send(payload)
    }

    pub async fn send_media(&self, payload: Bytes) -> Result<(), SendError<Bytes>> {
        self.media.send(payload).await
    }

    pub fn try_send_metadata(&self, text: String) -> Result<(), TrySendError<String>> {
        self.metadata.try_send(text)
    }

    pub async fn send_metadata(&self, text: String) -> Result<(), SendError<String>> {
        self.metadata.send(text).await
    }

    pub fn try_send_error(&self, notice: ErrorNotice) -> Result<(), TrySendError<ErrorNotice>> {
        self.errors.try_send(notice)
    }

    pub async fn send_error(&self, notice: ErrorNotice) -> Result<(), SendError<ErrorNotice>> {
        self.errors.send(notice).await
    }

    /// Error queue sender that does not keep the media queue open
    pub fn error_sender(&self) -> mpsc::Sender<ErrorNotice> {
        self.errors.clone()
    }

    /// True once the connection's writer has shut down
    pub fn is_closed(&self) -> bool {
        self.media.is_closed()
    }
}

/// Socket write half with the write deadline applied
struct Writer<S> {
    sink: Option<S>,
    write_wait: Duration,
    close_sent: bool,
}

impl<S> Writer<S>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    async fn write(&mut self, kind: MessageKind, payload: Bytes) -> Result<(), WriteError> {
        let message = codec::frame(kind, payload)?;
        let sink = self.sink.as_mut().ok_or(WriteError::Closed)?;
        if kind == MessageKind::Close {
            self.close_sent = true;
        }
        match time::timeout(self.write_wait, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
            Err(_) => Err(WriteError::Timeout(self.write_wait)),
        }
    }

    /// Send a close frame unless one went out already, then close the sink
    async fn shutdown(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        if !self.close_sent {
            self.close_sent = true;
            let _ = time::timeout(self.write_wait, sink.send(Message::Close(None))).await;
        }
        match time::timeout(self.write_wait, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Socket close failed: {}", e),
            Err(_) => debug!("Socket close timed out"),
        }
    }
}

/// Outbound multiplexer for one WebSocket
pub struct Connection<S> {
    id: Uuid,
    writer: Writer<S>,
    media: Option<mpsc::Receiver<Bytes>>,
    metadata: Option<mpsc::Receiver<String>>,
    errors: Option<mpsc::Receiver<ErrorNotice>>,
    ping_period: Duration,
}

impl<S> Connection<S>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    /// Wrap a socket write half
    pub fn new(sink: S, config: &ConnectionConfig) -> (Self, ConnectionHandle) {
        let id = Uuid::new_v4();
        let (media_tx, media_rx) = mpsc::channel(config.media_queue_capacity.max(1));
        let (metadata_tx, metadata_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        let connection = Self {
            id,
            writer: Writer {
                sink: Some(sink),
                write_wait: config.write_wait,
                close_sent: false,
            },
            media: Some(media_rx),
            metadata: Some(metadata_rx),
            errors: Some(errors_rx),
            ping_period: config.ping_period,
        };
        let handle = ConnectionHandle {
            id,
            media: media_tx,
            metadata: metadata_tx,
            errors: errors_tx,
        };
        (connection, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    async fn write(&mut self, kind: MessageKind, payload: Bytes) -> Result<(), WriteError> {
        self.writer.write(kind, payload).await
    }

    /// Drain every queue into the socket until a terminal condition
    pub async fn run(mut self) -> ExitReason {
        let mut ticker = time::interval_at(Instant::now() + self.ping_period, self.ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Connection {} writer started", self.id);

        let reason = loop {
            tokio::select! {
                message = recv_or_pending(&mut self.media) => match message {
                    Some(payload) => {
                        if let Err(e) = self.write(MessageKind::Binary, payload).await {
                            debug!("Connection {}: media write failed: {}", self.id, e);
                            break ExitReason::WriteFailed;
                        }
                    }
                    None => {
                        if self.flush_pending().await {
                            break ExitReason::TerminalNotice;
                        }
                        if let Err(e) = self.write(MessageKind::Close, Bytes::new()).await {
                            debug!("Connection {}: close frame failed: {}", self.id, e);
                        }
                        break ExitReason::MediaClosed;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.write(MessageKind::Ping, Bytes::new()).await {
                        debug!("Connection {}: ping failed: {}", self.id, e);
                        break ExitReason::WriteFailed;
                    }
                }
                metadata = recv_or_pending(&mut self.metadata) => match metadata {
                    Some(text) => self.deliver_metadata(text).await,
                    None => self.metadata = None,
                },
                notice = recv_or_pending(&mut self.errors) => match notice {
                    Some(notice) => {
                        if self.deliver_notice(notice).await {
                            break ExitReason::TerminalNotice;
                        }
                    }
                    None => self.errors = None,
                },
            }
        };

        self.close().await;
        info!("Connection {} finished: {:?}", self.id, reason);
        reason
    }

    /// Tear down the socket and every queue; safe to call repeatedly
    pub async fn close(&mut self) {
        self.writer.shutdown().await;
        if let Some(mut media) = self.media.take() {
            media.close();
        }
        if let Some(mut metadata) = self.metadata.take() {
            metadata.close();
        }
        if let Some(mut errors) = self.errors.take() {
            errors.close();
        }
    }

    async fn deliver_metadata(&mut self, text: String) {
        if let Err(e) = self.write(MessageKind::Text, Bytes::from(text)).await {
            warn!("Connection {}: metadata write failed: {}", self.id, e);
        }
    }

    /// Returns true when the notice ends the connection
    async fn deliver_notice(&mut self, notice: ErrorNotice) -> bool {
        match notice.to_json() {
            Ok(json) => {
                if let Err(e) = self.write(MessageKind::Text, Bytes::from(json)).await {
                    warn!("Connection {}: error notice write failed: {}", self.id, e);
                }
            }
            Err(e) => warn!(
                "Connection {}: skipping notice {} that failed to serialize: {}",
                self.id, notice.code, e
            ),
        }
        notice.level.is_terminal()
    }

    /// Write metadata and notices queued before the media queue closed.
    /// Returns true if a fatal notice was among them.
    async fn flush_pending(&mut self) -> bool {
        while let Some(text) = self.metadata.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.deliver_metadata(text).await;
        }
        while let Some(notice) = self.errors.as_mut().and_then(|rx| rx.try_recv().ok()) {
            if self.deliver_notice(notice).await {
                return true;
            }
        }
        false
    }
}

/// Receive from a queue, or wait forever once it has been closed
pub(crate) async fn recv_or_pending<T>(queue: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match queue {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Watch the read half for liveness.
///
/// Every inbound message resets the deadline. When the peer closes, errors
/// out or stays silent past `pong_wait`, a fatal notice is queued so the
/// writer tears the connection down.
pub async fn read_pump<R, E>(mut stream: R, errors: mpsc::Sender<ErrorNotice>, pong_wait: Duration)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let reason = loop {
        match time::timeout(pong_wait, stream.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                break "peer closed the connection".to_string();
            }
            Ok(Some(Ok(message))) => {
                if let Some(kind) = codec::kind_of(&message) {
                    debug!("Ignoring inbound {} message", kind);
                }
            }
            Ok(Some(Err(e))) => break format!("read failed: {}", e),
            Err(_) => break format!("no traffic from peer for {:?}", pong_wait),
        }
    };

    debug!("Read side finished: {}", reason);
    // The writer may already be gone; that is fine.
    let _ = errors.send(ErrorNotice::fatal(codes::PEER_GONE, reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    #[derive(Default)]
    struct SinkState {
        sent: Vec<Message>,
        closed: bool,
        fail: Vec<MessageKind>,
        stall: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        state: Arc<Mutex<SinkState>>,
    }

    impl RecordingSink {
        fn failing(kinds: &[MessageKind]) -> Self {
            let sink = Self::default();
            sink.state.lock().fail = kinds.to_vec();
            sink
        }

        fn stalled() -> Self {
            let sink = Self::default();
            sink.state.lock().stall = true;
            sink
        }

        fn kinds(&self) -> Vec<MessageKind> {
            self.state
                .lock()
                .sent
                .iter()
                .filter_map(codec::kind_of)
                .collect()
        }

        fn binaries(&self) -> Vec<Vec<u8>> {
            self.state
                .lock()
                .sent
                .iter()
                .filter_map(|m| match m {
                    Message::Binary(data) => Some(data.to_vec()),
                    _ => None,
                })
                .collect()
        }

        fn texts(&self) -> Vec<String> {
            self.state
                .lock()
                .sent
                .iter()
                .filter_map(|m| match m {
                    Message::Text(text) => Some(text.as_str().to_owned()),
                    _ => None,
                })
                .collect()
        }

        fn closed(&self) -> bool {
            self.state.lock().closed
        }
    }

    impl Sink<Message> for RecordingSink {
        type Error = io::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            if self.state.lock().stall {
                Poll::Pending
            } else {
                Poll::Ready(Ok(()))
            }
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), io::Error> {
            let mut state = self.state.lock();
            if let Some(kind) = codec::kind_of(&item) {
                if state.fail.contains(&kind) {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
                }
            }
            state.sent.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            self.state.lock().closed = true;
            Poll::Ready(Ok(()))
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn ping_period_stays_below_liveness_timeout() {
        assert_eq!(PING_PERIOD, Duration::from_secs(54));
        assert!(PING_PERIOD < PONG_WAIT);
        let config = ConnectionConfig::default().with_pong_wait(Duration::from_secs(10));
        assert_eq!(config.ping_period, Duration::from_secs(9));
    }

    #[tokio::test]
    async fn media_then_closure_writes_binary_then_close_frame() {
        let sink = RecordingSink::default();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle.send_media(Bytes::from_static(&[0x01, 0x02])).await.expect("queue");
        drop(handle);

        assert_eq!(connection.run().await, ExitReason::MediaClosed);
        assert_eq!(sink.kinds(), vec![MessageKind::Binary, MessageKind::Close]);
        assert_eq!(sink.binaries(), vec![vec![0x01, 0x02]]);
        assert!(sink.closed());
    }

    #[tokio::test]
    async fn warning_notice_is_written_and_loop_keeps_running() {
        let sink = RecordingSink::default();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());
        let writer = tokio::spawn(connection.run());

        handle
            .send_error(ErrorNotice::warning(codes::CODEC_OPEN_FAILED, "no codec"))
            .await
            .expect("queue");
        wait_for(|| sink.kinds().len() == 1).await;
        assert!(!writer.is_finished());

        let notice: serde_json::Value =
            serde_json::from_str(&sink.texts()[0]).expect("notice json");
        assert_eq!(notice["code"], 3);

        handle.send_media(Bytes::from_static(b"jpeg")).await.expect("queue");
        drop(handle);

        assert_eq!(writer.await.expect("join"), ExitReason::MediaClosed);
        assert_eq!(
            sink.kinds(),
            vec![MessageKind::Text, MessageKind::Binary, MessageKind::Close]
        );
    }

    #[tokio::test]
    async fn fatal_notice_ends_the_connection() {
        let sink = RecordingSink::default();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle
            .send_error(ErrorNotice::fatal(codes::PEER_GONE, "bye"))
            .await
            .expect("queue");

        assert_eq!(connection.run().await, ExitReason::TerminalNotice);
        assert_eq!(sink.kinds(), vec![MessageKind::Text, MessageKind::Close]);
        assert!(sink.closed());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn fatal_notice_ends_the_connection_even_if_its_write_fails() {
        let sink = RecordingSink::failing(&[MessageKind::Text]);
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle
            .send_error(ErrorNotice::new(codes::PEER_GONE, Severity::Fatal, "bye"))
            .await
            .expect("queue");

        assert_eq!(connection.run().await, ExitReason::TerminalNotice);
        assert_eq!(sink.kinds(), vec![MessageKind::Close]);
    }

    #[tokio::test]
    async fn media_write_failure_closes_every_queue() {
        let sink = RecordingSink::failing(&[MessageKind::Binary]);
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle.send_media(Bytes::from_static(b"jpeg")).await.expect("queue");

        assert_eq!(connection.run().await, ExitReason::WriteFailed);
        assert!(sink.closed());
        assert!(handle.is_closed());
        assert!(handle.try_send_metadata("late".into()).is_err());
        assert!(handle.try_send_error(ErrorNotice::warning(2, "late")).is_err());
    }

    #[tokio::test]
    async fn metadata_write_failure_is_not_fatal() {
        let sink = RecordingSink::failing(&[MessageKind::Text]);
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());
        let writer = tokio::spawn(connection.run());

        // The queue holds one item, so the second send waits for the first
        // to be taken by the writer.
        handle.send_metadata("one".into()).await.expect("queue");
        handle.send_metadata("two".into()).await.expect("queue");
        handle.send_media(Bytes::from_static(b"jpeg")).await.expect("queue");
        drop(handle);

        assert_eq!(writer.await.expect("join"), ExitReason::MediaClosed);
        assert_eq!(sink.kinds(), vec![MessageKind::Binary, MessageKind::Close]);
    }

    #[tokio::test]
    async fn metadata_queued_before_closure_is_flushed() {
        let sink = RecordingSink::default();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle.send_metadata("{\"stream\":\"cam\"}".into()).await.expect("queue");
        handle.send_media(Bytes::from_static(b"jpeg")).await.expect("queue");
        drop(handle);

        assert_eq!(connection.run().await, ExitReason::MediaClosed);
        let kinds = sink.kinds();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds.last(), Some(&MessageKind::Close));
        assert!(kinds.contains(&MessageKind::Text));
        assert!(kinds.contains(&MessageKind::Binary));
        assert_eq!(sink.texts(), vec!["{\"stream\":\"cam\"}".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_are_sent_each_period() {
        let sink = RecordingSink::default();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());
        let writer = tokio::spawn(connection.run());

        time::sleep(PING_PERIOD - Duration::from_secs(1)).await;
        assert!(sink.kinds().is_empty());
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.kinds(), vec![MessageKind::Ping]);

        drop(handle);
        assert_eq!(writer.await.expect("join"), ExitReason::MediaClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_socket_hits_the_write_deadline() {
        let sink = RecordingSink::stalled();
        let (connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        handle.send_media(Bytes::from_static(b"jpeg")).await.expect("queue");
        let started = Instant::now();

        assert_eq!(connection.run().await, ExitReason::WriteFailed);
        assert!(started.elapsed() >= WRITE_WAIT);
        assert!(sink.kinds().is_empty());
        assert!(sink.closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let sink = RecordingSink::default();
        let (mut connection, handle) = Connection::new(sink.clone(), &ConnectionConfig::default());

        connection.close().await;
        connection.close().await;

        assert_eq!(sink.kinds(), vec![MessageKind::Close]);
        assert!(sink.closed());
        assert!(handle.is_closed());
        assert!(matches!(
            connection.write(MessageKind::Binary, Bytes::new()).await,
            Err(WriteError::Closed)
        ));
    }

    #[tokio::test]
    async fn read_pump_reports_peer_close_as_fatal() {
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let inbound = futures::stream::iter(vec![
            Ok::<Message, io::Error>(Message::Pong(Bytes::new())),
            Ok(Message::Text("hello".into())),
            Ok(Message::Close(None)),
        ]);

        read_pump(inbound, errors_tx, PONG_WAIT).await;

        let notice = errors_rx.recv().await.expect("notice");
        assert_eq!(notice.code, codes::PEER_GONE);
        assert!(notice.level.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn read_pump_times_out_silent_peers() {
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let inbound = futures::stream::pending::<Result<Message, io::Error>>();

        read_pump(inbound, errors_tx, PONG_WAIT).await;

        let notice = errors_rx.recv().await.expect("notice");
        assert!(notice.message.contains("no traffic"));
    }
}
