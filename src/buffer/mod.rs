//! Frame buffering between network receipt and timed playback

pub mod frame;
pub mod ring;

pub use frame::{BufferListener, Frame, FrameBuffer, FrameSink};
pub use ring::RingBuffer;
