//! Wire formats for the camera's streaming protocols
//!
//! Both codecs are sans-IO: they consume byte slices and report events, and
//! the socket drivers in [`crate::network`] feed them.

pub mod preview;
pub mod viewfinder;

pub use preview::{DemuxEvent, MediaKind, PreviewMessageType, PreviewStreamDemuxer, PreviewStreamHeader};
pub use viewfinder::{ViewfinderEvent, ViewfinderHeader, ViewfinderMessageType, ViewfinderReassembler};
