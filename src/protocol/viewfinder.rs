//! Viewfinder datagram format and frame reassembly
//!
//! Every datagram starts with a 7-byte big-endian header:
//!
//! ```text
//! 0      2      3              5              7
//! | sync | type | packet number | payload len |
//! ```
//!
//! A `FrameStart` datagram carries an 8-byte payload: the total frame length
//! (`u32`) and the presentation timestamp (`f32` bit pattern). `FrameData`
//! datagrams carry consecutive slices of the frame, numbered one after the
//! other with `u16` wrap-around.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

pub const VIEWFINDER_SYNC: u16 = 0x55AA;
pub const VIEWFINDER_HEADER_SIZE: usize = 7;
/// Payload bytes of a `FrameStart` datagram
pub const FRAME_START_PAYLOAD_SIZE: usize = 8;

/// Datagram kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewfinderMessageType {
    FrameStart,
    FrameData,
    Unknown(u8),
}

impl From<u8> for ViewfinderMessageType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::FrameStart,
            1 => Self::FrameData,
            other => Self::Unknown(other),
        }
    }
}

impl From<ViewfinderMessageType> for u8 {
    fn from(value: ViewfinderMessageType) -> Self {
        match value {
            ViewfinderMessageType::FrameStart => 0,
            ViewfinderMessageType::FrameData => 1,
            ViewfinderMessageType::Unknown(other) => other,
        }
    }
}

/// Fixed datagram header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewfinderHeader {
    pub sync: u16,
    pub message_type: ViewfinderMessageType,
    pub packet_number: u16,
    pub payload_length: u16,
}

impl ViewfinderHeader {
    /// Parse and validate the header of `datagram`
    ///
    /// Checks the minimum size, the sync word and that the datagram holds
    /// exactly `payload_length` bytes after the header.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < VIEWFINDER_HEADER_SIZE {
            return Err(ProtocolError::ShortPacket {
                len: datagram.len(),
                expected: VIEWFINDER_HEADER_SIZE,
            });
        }

        let mut buf = datagram;
        let sync = buf.get_u16();
        if sync != VIEWFINDER_SYNC {
            return Err(ProtocolError::BadSync(sync));
        }

        let header = Self {
            sync,
            message_type: buf.get_u8().into(),
            packet_number: buf.get_u16(),
            payload_length: buf.get_u16(),
        };

        let expected = VIEWFINDER_HEADER_SIZE + header.payload_length as usize;
        if datagram.len() != expected {
            return Err(ProtocolError::LengthMismatch {
                len: datagram.len(),
                expected,
            });
        }

        Ok(header)
    }

    pub fn write_to(&self, out: &mut BytesMut) {
        out.put_u16(self.sync);
        out.put_u8(self.message_type.into());
        out.put_u16(self.packet_number);
        out.put_u16(self.payload_length);
    }
}

/// Extension carried by `FrameStart` datagrams
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStart {
    pub required_payload_length: u32,
    pub presentation_timestamp: f32,
}

impl FrameStart {
    fn parse(mut payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < FRAME_START_PAYLOAD_SIZE {
            return Err(ProtocolError::ShortPacket {
                len: VIEWFINDER_HEADER_SIZE + payload.len(),
                expected: VIEWFINDER_HEADER_SIZE + FRAME_START_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            required_payload_length: payload.get_u32(),
            presentation_timestamp: f32::from_bits(payload.get_u32()),
        })
    }
}

/// Output of feeding one datagram to the reassembler
#[derive(Debug, Clone, PartialEq)]
pub enum ViewfinderEvent {
    PresentationTimestamp(f64),
    Frame(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    AwaitingStart,
    AssemblingFrame { expected_packet: u16, required_length: usize },
}

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    pub frames_completed: u64,
    /// Partial frames abandoned on a sequence gap
    pub frames_dropped: u64,
    /// Datagrams rejected as malformed
    pub packets_discarded: u64,
}

/// Lossy best-effort frame reassembler
///
/// Any gap or reordering drops the frame in progress; assembly resumes at the
/// next `FrameStart`. Out-of-order packets are never buffered.
#[derive(Debug)]
pub struct ViewfinderReassembler {
    state: AssemblyState,
    frame: BytesMut,
    stats: ReassemblerStats,
}

impl ViewfinderReassembler {
    pub fn new() -> Self {
        Self {
            state: AssemblyState::AwaitingStart,
            frame: BytesMut::with_capacity(64 * 1024),
            stats: ReassemblerStats::default(),
        }
    }

    pub fn is_assembling(&self) -> bool {
        matches!(self.state, AssemblyState::AssemblingFrame { .. })
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Drop any partial frame and wait for the next `FrameStart`
    pub fn reset(&mut self) {
        self.frame.clear();
        self.state = AssemblyState::AwaitingStart;
    }

    /// Feed one datagram
    pub fn push(&mut self, datagram: &[u8]) -> Option<ViewfinderEvent> {
        let header = match ViewfinderHeader::parse(datagram) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Discarding viewfinder packet: {}", e);
                self.stats.packets_discarded += 1;
                return None;
            }
        };
        let payload = &datagram[VIEWFINDER_HEADER_SIZE..];

        match header.message_type {
            ViewfinderMessageType::FrameStart => self.on_frame_start(&header, payload),
            ViewfinderMessageType::FrameData => self.on_frame_data(&header, payload),
            ViewfinderMessageType::Unknown(kind) => {
                tracing::warn!("Unexpected viewfinder message {} received", kind);
                None
            }
        }
    }

    fn on_frame_start(&mut self, header: &ViewfinderHeader, payload: &[u8]) -> Option<ViewfinderEvent> {
        let start = match FrameStart::parse(payload) {
            Ok(start) => start,
            Err(e) => {
                tracing::warn!("Discarding viewfinder frame start: {}", e);
                self.stats.packets_discarded += 1;
                return None;
            }
        };

        self.frame.clear();
        self.state = AssemblyState::AssemblingFrame {
            expected_packet: header.packet_number.wrapping_add(1),
            required_length: start.required_payload_length as usize,
        };
        Some(ViewfinderEvent::PresentationTimestamp(f64::from(
            start.presentation_timestamp,
        )))
    }

    fn on_frame_data(&mut self, header: &ViewfinderHeader, payload: &[u8]) -> Option<ViewfinderEvent> {
        let AssemblyState::AssemblingFrame {
            expected_packet,
            required_length,
        } = self.state
        else {
            return None;
        };

        if header.packet_number != expected_packet {
            tracing::warn!(
                "Expected viewfinder packet {} but got {}",
                expected_packet,
                header.packet_number
            );
            self.stats.frames_dropped += 1;
            self.reset();
            return None;
        }

        self.frame.extend_from_slice(payload);
        if self.frame.len() >= required_length {
            self.state = AssemblyState::AwaitingStart;
            self.stats.frames_completed += 1;
            return Some(ViewfinderEvent::Frame(self.frame.split().freeze()));
        }

        self.state = AssemblyState::AssemblingFrame {
            expected_packet: expected_packet.wrapping_add(1),
            required_length,
        };
        None
    }
}

impl Default for ViewfinderReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a `FrameStart` datagram
pub fn encode_frame_start(packet_number: u16, required_payload_length: u32, presentation_timestamp: f32) -> Bytes {
    let mut out = BytesMut::with_capacity(VIEWFINDER_HEADER_SIZE + FRAME_START_PAYLOAD_SIZE);
    ViewfinderHeader {
        sync: VIEWFINDER_SYNC,
        message_type: ViewfinderMessageType::FrameStart,
        packet_number,
        payload_length: FRAME_START_PAYLOAD_SIZE as u16,
    }
    .write_to(&mut out);
    out.put_u32(required_payload_length);
    out.put_u32(presentation_timestamp.to_bits());
    out.freeze()
}

/// Build a `FrameData` datagram; `payload` must fit in a `u16` length
pub fn encode_frame_data(packet_number: u16, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(VIEWFINDER_HEADER_SIZE + payload.len());
    ViewfinderHeader {
        sync: VIEWFINDER_SYNC,
        message_type: ViewfinderMessageType::FrameData,
        packet_number,
        payload_length: payload.len() as u16,
    }
    .write_to(&mut out);
    out.extend_from_slice(payload);
    out.freeze()
}
