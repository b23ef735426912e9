//! Per-stream frame filter and JPEG transcoder
//!
//! Reads the shared decoded-frame feed, keeps only frames tagged for its
//! stream and publishes encoded packets to the stream's hub. Runs on a
//! blocking thread; sending to the hub blocks when the hub is behind.

use crate::capture::DecodedFrame;
use crate::encode::codec::{
    CodecDescriptor, CodecId, CodecLibrary, EncoderParams, FrameEncoder, FrameScaler, VideoFrame,
};
use crate::error::{codes, ErrorNotice};
use crate::shutdown::WorkerGuard;
use crate::stats::Metrics;
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

/// Everything a running transcode needs, built once per session
struct Pipeline<E, S> {
    encoder: E,
    scaler: S,
    frame: VideoFrame,
}

/// Frame filter/transcoder session for one stream
pub struct Transcoder<L: CodecLibrary> {
    library: Arc<L>,
    source: CodecDescriptor,
    stream_tag: i64,
    frames: broadcast::Receiver<DecodedFrame>,
    output: mpsc::Sender<Bytes>,
    errors: mpsc::Sender<ErrorNotice>,
    guard: Option<WorkerGuard>,
    metrics: Metrics,
}

impl<L: CodecLibrary> Transcoder<L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        library: Arc<L>,
        source: CodecDescriptor,
        stream_tag: i64,
        frames: broadcast::Receiver<DecodedFrame>,
        output: mpsc::Sender<Bytes>,
        errors: mpsc::Sender<ErrorNotice>,
        guard: WorkerGuard,
        metrics: Metrics,
    ) -> Self {
        Self {
            library,
            source,
            stream_tag,
            frames,
            output,
            errors,
            guard: Some(guard),
            metrics,
        }
    }

    /// Output geometry for this session
    pub fn target(&self) -> CodecDescriptor {
        self.source.target()
    }

    /// Run until the feed closes or the session fails. Blocking.
    pub fn run(mut self) {
        if let Err(report) = contain(|| self.transcode()) {
            self.metrics.transcoder_panics.inc();
            error!(
                "Transcoder for stream tag {} hit a runtime failure: {}",
                self.stream_tag, report
            );
        }
        self.close();
    }

    /// Release this session's shutdown guard
    pub fn close(&mut self) {
        if self.guard.take().is_some() {
            debug!("Transcoder for stream tag {} closed", self.stream_tag);
        }
    }

    fn transcode(&mut self) {
        let mut pipeline = match self.setup() {
            Ok(pipeline) => pipeline,
            Err(notice) => {
                error!(
                    "Transcoder setup failed for stream tag {}: {}",
                    self.stream_tag, notice.message
                );
                if self.errors.blocking_send(notice).is_err() {
                    debug!("Error notice dropped, hub is gone");
                }
                return;
            }
        };

        info!(
            "Transcoder running for stream tag {}: {}x{} -> {}x{}",
            self.stream_tag,
            self.source.width,
            self.source.height,
            pipeline.frame.width,
            pipeline.frame.height
        );

        loop {
            let frame = match self.frames.blocking_recv() {
                Ok(frame) => frame,
                Err(RecvError::Lagged(n)) => {
                    warn!(
                        "Transcoder for stream tag {} lagged, missed {} frames",
                        self.stream_tag, n
                    );
                    continue;
                }
                Err(RecvError::Closed) => {
                    info!("Frame feed closed, stopping stream tag {}", self.stream_tag);
                    return;
                }
            };
            self.metrics.frames_received.inc();

            if frame.stream_tag != self.stream_tag {
                self.metrics.frames_skipped.inc();
                continue;
            }

            if let Err(e) = pipeline.scaler.scale(&frame, &mut pipeline.frame) {
                error!("Scaling {} failed: {}", frame, e);
                return;
            }

            match pipeline.encoder.encode(&pipeline.frame) {
                Ok(Some(packet)) => {
                    if self.output.blocking_send(packet.data).is_err() {
                        info!("Hub for stream tag {} is gone, stopping", self.stream_tag);
                        return;
                    }
                    self.metrics.packets_published.inc();
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Encoding {} failed: {}", frame, e);
                    return;
                }
            }
        }
    }

    fn setup(&self) -> Result<Pipeline<L::Encoder, L::Scaler>, ErrorNotice> {
        let info = self
            .library
            .find_encoder(CodecId::Mjpeg)
            .map_err(|e| ErrorNotice::warning(codes::ENCODER_NOT_FOUND, e.to_string()))?;

        let target = self.target();
        let params = EncoderParams::for_encoder(&info, target);
        let encoder = self
            .library
            .open_encoder(&info, &params)
            .map_err(|e| ErrorNotice::warning(codes::CODEC_OPEN_FAILED, e.to_string()))?;

        let scaler = self
            .library
            .new_scaler(&self.source, &target)
            .map_err(|e| ErrorNotice::warning(codes::SCALER_INIT_FAILED, e.to_string()))?;

        let frame = self
            .library
            .alloc_frame(&target)
            .map_err(|e| ErrorNotice::warning(codes::FRAME_ALLOC_FAILED, e.to_string()))?;

        Ok(Pipeline {
            encoder,
            scaler,
            frame,
        })
    }
}

thread_local! {
    static TRACE_ARMED: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static TRACE_HOOK: Once = Once::new();

/// Chain a panic hook that records a backtrace at the panic site on threads
/// running inside [`contain`]
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if TRACE_ARMED.try_with(Cell::get).unwrap_or(false) {
                let _ = PANIC_TRACE.try_with(|slot| {
                    *slot.borrow_mut() = Some(Backtrace::force_capture());
                });
            }
            previous(info);
        }));
    });
}

/// Runtime failure caught by [`contain`]
struct PanicReport {
    reason: String,
    backtrace: Option<Backtrace>,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backtrace {
            Some(backtrace) => write!(f, "{}\n{}", self.reason, backtrace),
            None => write!(f, "{} (no backtrace)", self.reason),
        }
    }
}

/// Run `f`, turning a panic into a report with the stack of the panic site
fn contain<T>(f: impl FnOnce() -> T) -> Result<T, PanicReport> {
    install_trace_hook();
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());
    let armed = TRACE_ARMED.with(|flag| flag.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    TRACE_ARMED.with(|flag| flag.set(armed));

    outcome.map_err(|payload| PanicReport {
        reason: panic_reason(payload.as_ref()),
        backtrace: PANIC_TRACE.with(|slot| slot.borrow_mut().take()),
    })
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
