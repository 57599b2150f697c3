//! Preview stream framing
//!
//! The camera pushes a continuous TCP byte stream. Every message starts with a
//! 20-byte big-endian header; video and audio headers are followed by exactly
//! `size_of_frame_in_bytes` payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::Frame;
use crate::error::ProtocolError;

pub const PREVIEW_HEADER_SIZE: usize = 20;

/// Known header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PreviewMessageType {
    Video = 0,
    Audio = 1,
    StartOfStream = 127,
    EndOfStream = 128,
}

impl TryFrom<u32> for PreviewMessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Video),
            1 => Ok(Self::Audio),
            127 => Ok(Self::StartOfStream),
            128 => Ok(Self::EndOfStream),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Fixed header preceding every preview message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewStreamHeader {
    pub version: u32,
    pub message_type: u32,
    pub size_of_frame_in_bytes: u32,
    pub presentation_timestamp: u32,
    pub status: u32,
}

impl PreviewStreamHeader {
    pub fn new(message_type: PreviewMessageType, size_of_frame_in_bytes: u32, presentation_timestamp: u32) -> Self {
        Self {
            version: 0,
            message_type: message_type as u32,
            size_of_frame_in_bytes,
            presentation_timestamp,
            status: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != PREVIEW_HEADER_SIZE {
            return Err(ProtocolError::LengthMismatch {
                len: bytes.len(),
                expected: PREVIEW_HEADER_SIZE,
            });
        }
        let mut buf = bytes;
        Ok(Self {
            version: buf.get_u32(),
            message_type: buf.get_u32(),
            size_of_frame_in_bytes: buf.get_u32(),
            presentation_timestamp: buf.get_u32(),
            status: buf.get_u32(),
        })
    }

    pub fn kind(&self) -> Result<PreviewMessageType, ProtocolError> {
        PreviewMessageType::try_from(self.message_type)
    }

    pub fn to_bytes(&self) -> [u8; PREVIEW_HEADER_SIZE] {
        let mut out = [0u8; PREVIEW_HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.version);
        buf.put_u32(self.message_type);
        buf.put_u32(self.size_of_frame_in_bytes);
        buf.put_u32(self.presentation_timestamp);
        buf.put_u32(self.status);
        out
    }
}

/// Media carried by a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// What the demultiplexer produced from the last chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    StartOfStream,
    EndOfStream,
    /// A header announced a payload; read `len` bytes next
    AwaitingPayload { kind: MediaKind, len: usize },
    Frame { kind: MediaKind, frame: Frame },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemuxState {
    AwaitingHeader,
    AwaitingPayload { kind: MediaKind, header: PreviewStreamHeader },
    Finished,
}

/// Sans-IO preview stream state machine
///
/// The driver reads exactly `expected_len()` bytes and hands them to `feed`.
/// Any error desynchronizes the stream for good and the connection must be
/// closed.
#[derive(Debug)]
pub struct PreviewStreamDemuxer {
    state: DemuxState,
    max_frame_size: usize,
}

impl PreviewStreamDemuxer {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DemuxState::AwaitingHeader,
            max_frame_size,
        }
    }

    /// Number of bytes the next `feed` call must carry
    pub fn expected_len(&self) -> usize {
        match self.state {
            DemuxState::AwaitingHeader => PREVIEW_HEADER_SIZE,
            DemuxState::AwaitingPayload { header, .. } => header.size_of_frame_in_bytes as usize,
            DemuxState::Finished => 0,
        }
    }

    pub fn is_awaiting_header(&self) -> bool {
        self.state == DemuxState::AwaitingHeader
    }

    pub fn is_finished(&self) -> bool {
        self.state == DemuxState::Finished
    }

    pub fn feed(&mut self, chunk: Bytes) -> Result<DemuxEvent, ProtocolError> {
        let expected = self.expected_len();
        if chunk.len() != expected {
            return Err(ProtocolError::UnexpectedChunk {
                got: chunk.len(),
                expected,
            });
        }

        match self.state {
            DemuxState::AwaitingHeader => self.on_header(&chunk),
            DemuxState::AwaitingPayload { kind, header } => {
                self.state = DemuxState::AwaitingHeader;
                Ok(DemuxEvent::Frame {
                    kind,
                    frame: Frame::new(chunk, header.presentation_timestamp),
                })
            }
            DemuxState::Finished => Err(ProtocolError::UnexpectedChunk {
                got: chunk.len(),
                expected,
            }),
        }
    }

    fn on_header(&mut self, bytes: &[u8]) -> Result<DemuxEvent, ProtocolError> {
        let header = PreviewStreamHeader::parse(bytes)?;

        let kind = match header.kind()? {
            PreviewMessageType::StartOfStream => return Ok(DemuxEvent::StartOfStream),
            PreviewMessageType::EndOfStream => {
                self.state = DemuxState::Finished;
                return Ok(DemuxEvent::EndOfStream);
            }
            PreviewMessageType::Video => MediaKind::Video,
            PreviewMessageType::Audio => MediaKind::Audio,
        };

        let len = header.size_of_frame_in_bytes as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }

        self.state = DemuxState::AwaitingPayload { kind, header };
        Ok(DemuxEvent::AwaitingPayload { kind, len })
    }
}

/// Serialize a header followed by its payload
pub fn encode_message(message_type: PreviewMessageType, presentation_timestamp: u32, payload: &[u8]) -> Bytes {
    let header = PreviewStreamHeader::new(message_type, payload.len() as u32, presentation_timestamp);
    let mut out = BytesMut::with_capacity(PREVIEW_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}
