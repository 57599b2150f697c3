//! Video and audio frame buffering between the receiver and the pacers

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use crate::buffer::ring::RingBuffer;
use crate::config::BufferConfig;

/// One complete unit of compressed video or audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
    /// Raw presentation timestamp from the stream header
    pub presentation_timestamp: u32,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>, presentation_timestamp: u32) -> Self {
        Self {
            payload: payload.into(),
            presentation_timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Destination for frames demultiplexed off the network
///
/// Offers hand the frame back when it cannot be stored yet; the caller is
/// expected to retry later rather than drop it.
pub trait FrameSink: Send + Sync {
    fn offer_video(&self, frame: Frame) -> Result<(), Frame>;

    fn offer_audio(&self, frame: Frame) -> Result<(), Frame>;

    /// Polled by the receiver before each header read
    fn safe_to_read_more_data(&self) -> bool;
}

/// Notified by the frame buffer
pub trait BufferListener: Send + Sync {
    /// Enough video is buffered to start playback. Fires once per session.
    fn minimum_video_frames_reached(&self);
}

/// Paired video/audio ring buffers with a start watermark and write gate
pub struct FrameBuffer {
    video: RingBuffer<Frame>,
    audio: RingBuffer<Frame>,
    write_enabled: AtomicBool,
    start_signalled: AtomicBool,
    min_video_frames_for_start: usize,
    listener: RwLock<Option<Weak<dyn BufferListener>>>,
}

impl FrameBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            video: RingBuffer::new(config.video_capacity),
            audio: RingBuffer::new(config.audio_capacity),
            write_enabled: AtomicBool::new(true),
            start_signalled: AtomicBool::new(false),
            min_video_frames_for_start: config.min_video_frames_for_start,
            listener: RwLock::new(None),
        }
    }

    pub fn set_listener(&self, listener: Weak<dyn BufferListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Allow writes again after `clear`
    pub fn enable_writes(&self) {
        self.write_enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_write_enabled(&self) -> bool {
        self.write_enabled.load(Ordering::SeqCst)
    }

    /// Disable writes and drop everything buffered
    pub fn clear(&self) {
        self.write_enabled.store(false, Ordering::SeqCst);
        self.video.clear();
        self.audio.clear();
        self.start_signalled.store(false, Ordering::SeqCst);
    }

    pub fn read_video(&self) -> Option<Frame> {
        self.video.read()
    }

    pub fn read_audio(&self) -> Option<Frame> {
        self.audio.read()
    }

    pub fn has_data_for_reading(&self) -> bool {
        self.video.can_read() || self.audio.can_read()
    }

    pub fn video_len(&self) -> usize {
        self.video.len()
    }

    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    pub fn video(&self) -> &RingBuffer<Frame> {
        &self.video
    }

    pub fn audio(&self) -> &RingBuffer<Frame> {
        &self.audio
    }

    pub fn min_video_frames_for_start(&self) -> usize {
        self.min_video_frames_for_start
    }

    fn check_watermark(&self) {
        if self.video.write_index() < self.min_video_frames_for_start as u64 {
            return;
        }
        if self.start_signalled.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(
            "Minimum of {} video frames buffered",
            self.min_video_frames_for_start
        );
        let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.minimum_video_frames_reached();
        }
    }
}

impl FrameSink for FrameBuffer {
    fn offer_video(&self, frame: Frame) -> Result<(), Frame> {
        if !self.is_write_enabled() {
            tracing::trace!("Writes disabled, holding back video frame");
            return Err(frame);
        }
        self.video.write(frame)?;
        self.check_watermark();
        Ok(())
    }

    fn offer_audio(&self, frame: Frame) -> Result<(), Frame> {
        if !self.is_write_enabled() {
            tracing::trace!("Writes disabled, holding back audio frame");
            return Err(frame);
        }
        self.audio.write(frame)
    }

    fn safe_to_read_more_data(&self) -> bool {
        self.video.can_write() && self.audio.can_write() && self.is_write_enabled()
    }
}
