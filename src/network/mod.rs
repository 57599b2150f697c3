//! Socket drivers for the viewfinder (UDP) and preview (TCP) streams

pub mod receiver;
pub mod socket;
pub mod viewfinder;

pub use receiver::{PortBinder, PreviewStreamReceiver, ReceiverStats, StreamEnd, StreamStateListener};
pub use viewfinder::{ViewfinderListener, ViewfinderStream};
