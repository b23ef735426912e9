//! mjpeg-player - Main entry point
//!
//! Serves the configured streams over WebSocket, fed by the built-in test
//! pattern source.

mod args;

use args::Args;
use clap::Parser;
use log::{error, info, warn};
use mjpeg_player::capture::{frame_feed, PatternSource, PatternStream};
use mjpeg_player::config::Config;
use mjpeg_player::encode::{JpegConfig, JpegLibrary};
use mjpeg_player::stats::Metrics;
use mjpeg_player::stream::{StreamManager, StreamRegistry};
use mjpeg_player::web::{self, SharedState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task;

/// Time allowed for transcoders to drain on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration before logging so its level can seed the filter
    let loaded = args.load_config();
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };
    args.apply(&mut config);

    env_logger::Builder::new()
        .parse_filters(
            &std::env::var("MJPEG_PLAYER_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        )
        .init();

    info!("mjpeg-player v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    config.validate()?;
    let config = Arc::new(config);

    let metrics = Metrics::new()?;
    let registry = Arc::new(StreamRegistry::new());
    let feed = frame_feed(config.source.feed_capacity);
    let library = Arc::new(JpegLibrary::new(JpegConfig {
        quality: config.encoding.jpeg_quality,
    }));
    let manager = StreamManager::new(library, registry.clone(), feed.clone(), metrics.clone());

    for stream in &config.streams {
        manager.add_stream(stream.to_spec())?;
    }

    // Frame source
    let running = Arc::new(AtomicBool::new(true));
    let source = PatternSource::new(
        config
            .streams
            .iter()
            .map(|s| PatternStream {
                tag: s.tag,
                width: s.width,
                height: s.height,
            })
            .collect(),
        config.source.fps,
    );
    let source_running = running.clone();
    let source_handle = task::spawn_blocking(move || source.run(feed, source_running));

    // HTTP / WebSocket server
    let state = Arc::new(SharedState::new(config.clone(), registry, metrics));
    let host = config.http.host.clone();
    let port = config.http.port;
    let mut http_handle = tokio::spawn(async move {
        if let Err(e) = web::run_http_server(&host, port, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!(
        "Serving {} streams on ws://{}:{}/ws/<stream>",
        config.streams.len(),
        config.http.host,
        config.http.port
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = &mut http_handle => {
            error!("HTTP server exited unexpectedly");
        }
    }

    // Stop the source first so the feed can close
    running.store(false, Ordering::Relaxed);
    if let Err(e) = source_handle.await {
        warn!("Pattern source task failed: {}", e);
    }

    if !manager.shutdown(SHUTDOWN_GRACE).await {
        warn!("Some transcoders did not stop in time");
    }
    http_handle.abort();

    info!("mjpeg-player stopped");
    Ok(())
}
