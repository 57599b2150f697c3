//! UDP viewfinder receiver

use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::socket::create_udp_socket;
use crate::protocol::viewfinder::{ReassemblerStats, ViewfinderEvent, ViewfinderReassembler};

/// Receives reassembled viewfinder output
pub trait ViewfinderListener: Send + Sync {
    fn presentation_timestamp_received(&self, presentation_timestamp: f64);

    fn frame_received(&self, frame: Bytes);
}

/// Live viewfinder stream bound to a local UDP port
pub struct ViewfinderStream {
    listener: Arc<dyn ViewfinderListener>,
    recv_buffer_size: usize,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<ReassemblerStats>>,
    local_addr: Option<SocketAddr>,
}

impl ViewfinderStream {
    pub fn new(listener: Arc<dyn ViewfinderListener>, recv_buffer_size: usize) -> Self {
        Self {
            listener,
            recv_buffer_size,
            cancel: None,
            task: None,
            local_addr: None,
        }
    }

    /// Start receiving on `port` on all interfaces
    pub fn start(&mut self, port: u16) -> Result<SocketAddr, NetworkError> {
        self.start_on(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Start receiving on `addr`; restarts if already running
    pub fn start_on(&mut self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        self.stop();

        let socket = create_udp_socket(addr, self.recv_buffer_size)
            .and_then(UdpSocket::from_std)
            .map_err(|e| {
                tracing::error!("Failed to start viewfinder client on {}: {}", addr, e);
                NetworkError::BindFailed(e.to_string())
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(socket, self.listener.clone(), cancel.clone()));

        tracing::info!("Viewfinder receiving on {}", local_addr);
        self.cancel = Some(cancel);
        self.task = Some(task);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Close the socket
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.task = None;
        self.local_addr = None;
    }

    /// Close the socket and wait for the receive task, returning its counters
    pub async fn shutdown(&mut self) -> Option<ReassemblerStats> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.local_addr = None;
        match self.task.take() {
            Some(task) => task.await.ok(),
            None => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for ViewfinderStream {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    listener: Arc<dyn ViewfinderListener>,
    cancel: CancellationToken,
) -> ReassemblerStats {
    let mut reassembler = ViewfinderReassembler::new();
    let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let len = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut datagram) => match received {
                Ok((len, _)) => len,
                Err(e) => {
                    tracing::warn!("Viewfinder receive failed: {}", e);
                    continue;
                }
            },
        };

        match reassembler.push(&datagram[..len]) {
            Some(ViewfinderEvent::PresentationTimestamp(pts)) => {
                listener.presentation_timestamp_received(pts)
            }
            Some(ViewfinderEvent::Frame(frame)) => listener.frame_received(frame),
            None => {}
        }
    }

    let stats = reassembler.stats();
    tracing::debug!(
        "Viewfinder stopped: {} frames, {} dropped, {} packets discarded",
        stats.frames_completed,
        stats.frames_dropped,
        stats.packets_discarded
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::viewfinder::{encode_frame_data, encode_frame_start};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        timestamps: Mutex<Vec<f64>>,
        frames: Mutex<Vec<Bytes>>,
    }

    impl ViewfinderListener for Recorder {
        fn presentation_timestamp_received(&self, presentation_timestamp: f64) {
            self.timestamps.lock().push(presentation_timestamp);
        }

        fn frame_received(&self, frame: Bytes) {
            self.frames.lock().push(frame);
        }
    }

    #[tokio::test]
    async fn test_receives_frame_over_loopback() {
        let recorder = Arc::new(Recorder::default());
        let mut stream = ViewfinderStream::new(recorder.clone(), 64 * 1024);
        let addr = stream.start_on("127.0.0.1:0".parse().unwrap()).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&encode_frame_start(1, 6, 2.5), addr).await.unwrap();
        sender.send_to(&encode_frame_data(2, b"jpe"), addr).await.unwrap();
        sender.send_to(&encode_frame_data(3, b"g!!"), addr).await.unwrap();

        for _ in 0..100 {
            if !recorder.frames.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*recorder.timestamps.lock(), vec![2.5]);
        assert_eq!(*recorder.frames.lock(), vec![Bytes::from_static(b"jpeg!!")]);

        let stats = stream.shutdown().await.unwrap();
        assert_eq!(stats.frames_completed, 1);
        assert!(!stream.is_running());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let mut stream = ViewfinderStream::new(Arc::new(Recorder::default()), 64 * 1024);
        assert!(matches!(stream.start_on(addr), Err(NetworkError::BindFailed(_))));
        assert!(!stream.is_running());
    }
}
