//! # Camera Preview
//!
//! Receive, buffer and pace the live preview streams of an action camera.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── CAMERA ────────────────────────────────┐
//! │   UDP viewfinder (port 4001)            TCP preview (we listen 4010+)  │
//! └──────────┬──────────────────────────────────────────┬──────────────────┘
//!            │ datagrams                                │ header + payload
//!            ▼                                          ▼
//! ┌────────────────────────┐              ┌──────────────────────────────┐
//! │ network::viewfinder    │              │ network::receiver            │
//! │ protocol::viewfinder   │              │ protocol::preview            │
//! │ (frame reassembly)     │              │ (demultiplexing)             │
//! └──────────┬─────────────┘              └──────────────┬───────────────┘
//!            │                                           │ offer / backpressure
//!            ▼                                           ▼
//!   ViewfinderListener                    ┌──────────────────────────────┐
//!                                         │ buffer::FrameBuffer          │
//!                                         │  video ring   │  audio ring  │
//!                                         └───────┬───────┴──────┬───────┘
//!                                                 │ tick         │ pull
//!                                                 ▼              ▼
//!                                         ┌──────────────┐ ┌─────────────┐
//!                                         │ VideoPacer   │ │ AudioPacer  │
//!                                         └──────┬───────┘ └──────┬──────┘
//!                                                ▼                ▼
//!                                         PreviewListener    AudioOutput
//! ```
//!
//! `session::PreviewSession` drives the REST start/stop calls through
//! `control::CameraControl` and ties the receiver and pacers together.

pub mod buffer;
pub mod config;
pub mod control;
pub mod error;
pub mod media;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod retry;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default UDP port of the viewfinder stream
    pub const DEFAULT_VIEWFINDER_PORT: u16 = 4001;

    /// First port tried for the preview listening socket
    pub const MIN_PREVIEW_LISTENING_PORT: u16 = 4010;

    /// Last port tried for the preview listening socket
    pub const MAX_PREVIEW_LISTENING_PORT: u16 = 4099;

    /// Preview socket read timeout
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

    /// Delay between backpressure and audio starvation retries
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 300;

    /// Largest preview frame accepted from a header
    pub const MAX_PREVIEW_FRAME_SIZE: usize = 8 * 1024 * 1024;

    /// Largest UDP datagram read from the viewfinder socket
    pub const MAX_DATAGRAM_SIZE: usize = 65536;

    /// Video ring buffer capacity (in frames)
    pub const VIDEO_BUFFER_CAPACITY: usize = 2000;

    /// Audio ring buffer capacity (in frames)
    pub const AUDIO_BUFFER_CAPACITY: usize = 8000;

    /// Video frames buffered before playback starts
    pub const MIN_VIDEO_FRAMES_FOR_START: usize = 30;

    /// Display refresh rate the video pacer divides down from
    pub const NATIVE_REFRESH_RATE: f64 = 60.0;

    /// Fastest preview presentation rate
    pub const MAX_PREVIEW_FRAMERATE: f64 = 30.0;

    /// Raw timestamp units per reported unit
    pub const PTS_DIVIDER: u32 = 90;

    /// Preview audio sample rate at normal speed
    pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

    /// Bytes per hardware audio buffer
    pub const AUDIO_OUTPUT_BUFFER_SIZE: usize = 4000;

    /// Number of hardware audio buffers in rotation
    pub const AUDIO_OUTPUT_BUFFER_COUNT: usize = 3;

    /// ADTS header prefixed to each AAC frame
    pub const ADTS_HEADER_SIZE: usize = 7;
}
