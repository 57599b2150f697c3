//! Pull-driven audio playback
//!
//! The audio output owns a small rotation of hardware buffers. Whenever one
//! is played out it calls [`AudioPacer::buffer_emptied`], which packs as many
//! buffered AAC frames as fit (ADTS headers stripped) and enqueues them. When
//! the frame buffer is empty the refill is retried after a fixed delay.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::buffer::FrameBuffer;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::retry::RetryTimer;

/// Location of one compressed packet inside an [`AudioChunk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    pub start_offset: usize,
    pub size: usize,
}

/// Contents of one hardware buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Bytes,
    pub packets: Vec<PacketDescription>,
}

impl AudioChunk {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn push(&mut self, data: &mut BytesMut, packet: &[u8]) {
        self.packets.push(PacketDescription {
            start_offset: data.len(),
            size: packet.len(),
        });
        data.extend_from_slice(packet);
    }
}

/// Audio hardware seam
///
/// Implementations call [`AudioPacer::buffer_emptied`] from their own callback
/// thread each time a hardware buffer has been played out.
pub trait AudioOutput: Send + Sync {
    /// Allocate `buffer_count` buffers of `buffer_size` bytes for AAC at `sample_rate`
    fn prepare(&self, sample_rate: f64, buffer_count: usize, buffer_size: usize) -> Result<(), PlaybackError>;

    fn start(&self) -> Result<(), PlaybackError>;

    fn pause(&self) -> Result<(), PlaybackError>;

    /// Stop immediately and discard queued buffers
    fn stop(&self) -> Result<(), PlaybackError>;

    fn enqueue(&self, buffer_index: usize, chunk: AudioChunk) -> Result<(), PlaybackError>;
}

struct AudioShared {
    buffer: Arc<FrameBuffer>,
    output: Arc<dyn AudioOutput>,
    handle: Handle,
    retry_interval: Duration,
    sample_rate: f64,
    buffer_size: usize,
    buffer_count: usize,
    adts_header_size: usize,
    initialized: AtomicBool,
    playing: AtomicBool,
    /// Frame that did not fit into the previous hardware buffer
    leftover: Mutex<Option<Bytes>>,
    retry: Mutex<RetryTimer>,
}

/// Feeds the audio output from the frame buffer
#[derive(Clone)]
pub struct AudioPacer {
    shared: Arc<AudioShared>,
}

impl AudioPacer {
    pub fn new(
        config: &PlaybackConfig,
        retry_interval: Duration,
        buffer: Arc<FrameBuffer>,
        output: Arc<dyn AudioOutput>,
        handle: Handle,
    ) -> Self {
        let retry = RetryTimer::new(retry_interval, CancellationToken::new());
        retry.token().cancel();

        Self {
            shared: Arc::new(AudioShared {
                buffer,
                output,
                handle,
                retry_interval,
                sample_rate: config.sample_rate,
                buffer_size: config.audio_buffer_size,
                buffer_count: config.audio_buffer_count,
                adts_header_size: config.adts_header_size,
                initialized: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                leftover: Mutex::new(None),
                retry: Mutex::new(retry),
            }),
        }
    }

    /// Prepare the output at the default sample rate scaled by `sample_rate_modifier`
    pub fn initialize(&self, sample_rate_modifier: f64) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        let sample_rate = shared.sample_rate * sample_rate_modifier;

        shared
            .output
            .prepare(sample_rate, shared.buffer_count, shared.buffer_size)
            .map_err(|e| {
                tracing::error!("Failed to initialize audio at {} Hz: {}", sample_rate, e);
                e
            })?;
        shared.initialized.store(true, Ordering::SeqCst);
        tracing::debug!("Audio initialized at {} Hz", sample_rate);
        Ok(())
    }

    /// Start playback, filling every hardware buffer once first when `prime` is set
    pub fn start(&self, prime: bool) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        if !shared.initialized.load(Ordering::SeqCst) {
            return Err(PlaybackError::NotInitialized);
        }
        if shared.playing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *shared.retry.lock() = RetryTimer::new(shared.retry_interval, CancellationToken::new());

        if prime {
            for index in 0..shared.buffer_count {
                self.buffer_emptied(index);
            }
        }

        shared.output.start().map_err(|e| {
            tracing::error!("Failed to start audio: {}", e);
            e
        })
    }

    /// Stop and reset the output; `initialize` is required before the next start
    pub fn stop(&self) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        if !shared.playing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        shared.retry.lock().token().cancel();
        *shared.leftover.lock() = None;
        shared.initialized.store(false, Ordering::SeqCst);

        shared.output.stop().map_err(|e| {
            tracing::error!("Failed to stop audio: {}", e);
            e
        })
    }

    /// Pause when playing, otherwise resume without priming
    pub fn pause(&self) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        if shared.playing.swap(false, Ordering::SeqCst) {
            shared.retry.lock().token().cancel();
            shared.output.pause().map_err(|e| {
                tracing::error!("Failed to pause audio: {}", e);
                e
            })
        } else {
            self.start(false)
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Hardware callback: refill buffer `index`
    ///
    /// Never blocks. With nothing to play the refill is retried after the
    /// retry interval for as long as playback continues.
    pub fn buffer_emptied(&self, index: usize) {
        let shared = &self.shared;
        if !shared.playing.load(Ordering::SeqCst) {
            return;
        }

        let chunk = shared.fill();
        if !chunk.is_empty() {
            if let Err(e) = shared.output.enqueue(index, chunk) {
                tracing::warn!("Failed to enqueue audio buffer {}: {}", index, e);
            }
            return;
        }

        let retry = shared.retry.lock().clone();
        let weak: Weak<AudioShared> = Arc::downgrade(shared);
        retry.schedule(&shared.handle, move || {
            if let Some(shared) = weak.upgrade() {
                AudioPacer { shared }.buffer_emptied(index);
            }
        });
    }
}

impl AudioShared {
    /// Pack frames into one hardware buffer
    fn fill(&self) -> AudioChunk {
        let mut data = BytesMut::with_capacity(self.buffer_size);
        let mut chunk = AudioChunk::default();
        let mut leftover = self.leftover.lock();

        if let Some(frame) = leftover.take() {
            chunk.push(&mut data, &frame);
        }

        while let Some(frame) = self.buffer.read_audio() {
            if frame.len() <= self.adts_header_size {
                tracing::trace!("Skipping audio frame of {} bytes", frame.len());
                continue;
            }
            let packet = frame.payload.slice(self.adts_header_size..);

            if data.len() + packet.len() < self.buffer_size {
                chunk.push(&mut data, &packet);
            } else if packet.len() >= self.buffer_size {
                tracing::warn!(
                    "Dropping audio frame of {} bytes, larger than the {} byte output buffer",
                    packet.len(),
                    self.buffer_size
                );
            } else {
                *leftover = Some(packet);
                break;
            }
        }

        chunk.data = data.freeze();
        chunk
    }
}
