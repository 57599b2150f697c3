//! Viewfinder Dump Tool
//!
//! Receives the camera's UDP viewfinder stream and writes every reassembled
//! frame to disk as `frame-<n>.jpg`.
//!
//! Usage: `viewfinder [port] [output-dir]`

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_preview::{
    config::PreviewConfig,
    network::viewfinder::{ViewfinderListener, ViewfinderStream},
};

/// Frames queued for the writer thread before new ones are dropped
const WRITE_QUEUE_DEPTH: usize = 64;

/// Hands frames to the writer thread without blocking the receive task
struct FrameDumper {
    frames: Sender<Bytes>,
    dropped: AtomicU64,
}

impl ViewfinderListener for FrameDumper {
    fn presentation_timestamp_received(&self, presentation_timestamp: f64) {
        tracing::debug!("Frame start at {:.3}", presentation_timestamp);
    }

    fn frame_received(&self, frame: Bytes) {
        if let Err(TrySendError::Full(_)) = self.frames.try_send(frame) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!("Writer falling behind, {} frames dropped", dropped);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PreviewConfig::load_or_default()?;

    let mut args = std::env::args().skip(1);
    let port = match args.next() {
        Some(port) => port.parse::<u16>().with_context(|| format!("Invalid port: {}", port))?,
        None => config.network.viewfinder_port,
    };
    let output_dir = PathBuf::from(args.next().unwrap_or_else(|| "viewfinder-frames".into()));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Cannot create {}", output_dir.display()))?;

    let (frame_tx, frame_rx) = bounded::<Bytes>(WRITE_QUEUE_DEPTH);
    let writer_dir = output_dir.clone();
    let writer = thread::Builder::new()
        .name("frame-writer".into())
        .spawn(move || {
            let mut written = 0u64;
            for frame in frame_rx {
                let path = writer_dir.join(format!("frame-{}.jpg", written));
                match std::fs::write(&path, &frame) {
                    Ok(()) => written += 1,
                    Err(e) => tracing::error!("Failed to write {}: {}", path.display(), e),
                }
            }
            written
        })?;

    let dumper = Arc::new(FrameDumper {
        frames: frame_tx,
        dropped: AtomicU64::new(0),
    });
    let mut stream = ViewfinderStream::new(dumper.clone(), config.network.recv_buffer_size);
    let addr = stream.start(port)?;

    tracing::info!("Writing viewfinder frames from {} to {}", addr, output_dir.display());
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    if let Some(stats) = stream.shutdown().await {
        tracing::info!(
            "Viewfinder stats: {} frames, {} dropped, {} packets discarded",
            stats.frames_completed,
            stats.frames_dropped,
            stats.packets_discarded
        );
    }
    let dropped = dumper.dropped.load(Ordering::Relaxed);
    drop(stream);
    drop(dumper);

    let written = writer
        .join()
        .map_err(|_| anyhow::anyhow!("Frame writer thread panicked"))?;
    tracing::info!("Wrote {} frames ({} dropped by the writer queue)", written, dropped);

    Ok(())
}
