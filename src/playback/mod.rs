//! Playback pacing
//!
//! Video is pushed out by a fixed-rate timer, audio is pulled by the output
//! hardware. Both drain the shared [`crate::buffer::FrameBuffer`] and never
//! block on it.

pub mod audio;
pub mod video;

pub use audio::{AudioChunk, AudioOutput, AudioPacer, PacketDescription};
pub use video::{frame_interval, VideoPacer, VideoSink};
