//! TCP preview stream receiver
//!
//! The receiver listens on the first free port in a fixed range and hands
//! that port to the camera through the REST start call. The camera connects
//! and pushes header/payload messages that are demultiplexed into the frame
//! sink. Reading pauses whenever the sink reports it is full.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::FrameSink;
use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::socket::{bind_tcp_listener, open_listener_in_range};
use crate::protocol::preview::{DemuxEvent, MediaKind, PreviewStreamDemuxer};
use crate::retry::RetryTimer;

/// Connection lifecycle notifications
pub trait StreamStateListener: Send + Sync {
    fn preview_did_connect(&self);

    fn start_of_stream_received(&self);

    fn end_of_stream_received(&self);

    /// The connection closed. `reason` is `None` for end of stream or a local stop.
    fn preview_did_disconnect(&self, reason: Option<&NetworkError>);
}

/// Binds a listening socket for a given port
pub type PortBinder = Box<dyn FnMut(u16) -> io::Result<std::net::TcpListener> + Send>;

/// Receive counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub headers_read: AtomicU64,
    pub frames_received: AtomicU64,
    pub bytes_received: AtomicU64,
}

/// Receive loop settings
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub read_timeout: Duration,
    pub retry_interval: Duration,
    pub max_frame_size: usize,
}

impl From<&NetworkConfig> for ReceiverOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            retry_interval: config.retry_interval(),
            max_frame_size: config.max_frame_size,
        }
    }
}

/// How a connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    EndOfStream,
    Cancelled,
}

struct Shared {
    sink: Arc<dyn FrameSink>,
    state_listener: Weak<dyn StreamStateListener>,
    options: ReceiverOptions,
    receiving: AtomicBool,
    /// Id and cancellation token of the active connection
    connection: Mutex<Option<(u64, CancellationToken)>>,
    next_connection_id: AtomicU64,
    stats: Arc<ReceiverStats>,
}

fn notify(listener: &Weak<dyn StreamStateListener>, f: impl FnOnce(&dyn StreamStateListener)) {
    if let Some(listener) = listener.upgrade() {
        f(listener.as_ref());
    }
}

/// Listening socket plus at most one active camera connection
pub struct PreviewStreamReceiver {
    shared: Arc<Shared>,
    ports: RangeInclusive<u16>,
    binder: PortBinder,
    listening_port: Option<u16>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl PreviewStreamReceiver {
    pub fn new(
        config: &NetworkConfig,
        sink: Arc<dyn FrameSink>,
        state_listener: Weak<dyn StreamStateListener>,
    ) -> Self {
        Self::with_binder(config, sink, state_listener, Box::new(bind_tcp_listener))
    }

    /// Like `new`, but ports are opened through `binder`
    pub fn with_binder(
        config: &NetworkConfig,
        sink: Arc<dyn FrameSink>,
        state_listener: Weak<dyn StreamStateListener>,
        binder: PortBinder,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                state_listener,
                options: ReceiverOptions::from(config),
                receiving: AtomicBool::new(false),
                connection: Mutex::new(None),
                next_connection_id: AtomicU64::new(0),
                stats: Arc::new(ReceiverStats::default()),
            }),
            ports: config.preview_ports(),
            binder,
            listening_port: None,
            local_addr: None,
            shutdown: CancellationToken::new(),
            accept_task: None,
        }
    }

    /// Start listening; must be called within a Tokio runtime
    pub fn start(&mut self) -> Result<u16, NetworkError> {
        if let Some(port) = self.listening_port {
            return Ok(port);
        }

        let (port, listener) = open_listener_in_range(self.ports.clone(), &mut self.binder)?;
        let listener = listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        self.local_addr = listener.local_addr().ok();

        self.shutdown = CancellationToken::new();
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener,
            self.shared.clone(),
            self.shutdown.clone(),
        )));
        self.listening_port = Some(port);
        tracing::info!("Preview receiver listening on port {}", port);
        Ok(port)
    }

    /// Drop the current connection but keep listening
    pub fn stop_receiving(&self) {
        if let Some((_, connection)) = self.shared.connection.lock().take() {
            connection.cancel();
        }
        self.shared.receiving.store(false, Ordering::SeqCst);
    }

    /// Drop the current connection and close the listening socket
    pub fn stop(&mut self) {
        self.stop_receiving();
        self.shutdown.cancel();
        self.accept_task = None;
        self.listening_port = None;
        self.local_addr = None;
    }

    pub fn listening_port(&self) -> Option<u16> {
        self.listening_port
    }

    /// Address the listening socket is actually bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.listening_port.is_some()
    }

    pub fn is_receiving(&self) -> bool {
        self.shared.receiving.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.shared.stats.clone()
    }
}

impl Drop for PreviewStreamReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept preview connection: {}", e);
                    continue;
                }
            },
        };
        tracing::debug!("Preview connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        let token = shutdown.child_token();
        let id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = shared.connection.lock().replace((id, token.clone())) {
            tracing::debug!("Replacing previous preview connection");
            previous.cancel();
        }
        shared.receiving.store(true, Ordering::SeqCst);
        notify(&shared.state_listener, |l| l.preview_did_connect());

        let shared = shared.clone();
        tokio::spawn(async move {
            let retry = RetryTimer::new(shared.options.retry_interval, token.clone());
            let result = receive_stream(
                stream,
                shared.sink.as_ref(),
                &shared.state_listener,
                &retry,
                &shared.options,
                &shared.stats,
            )
            .await;

            {
                let mut current = shared.connection.lock();
                if current.as_ref().is_some_and(|(current_id, _)| *current_id == id) {
                    *current = None;
                    shared.receiving.store(false, Ordering::SeqCst);
                }
            }

            match result {
                Ok(end) => {
                    tracing::debug!("Preview connection closed: {:?}", end);
                    notify(&shared.state_listener, |l| l.preview_did_disconnect(None));
                }
                Err(e) => {
                    tracing::warn!("Preview connection failed: {}", e);
                    notify(&shared.state_listener, |l| l.preview_did_disconnect(Some(&e)));
                }
            }
        });
    }
    tracing::debug!("Preview listener closed");
}

/// Read and demultiplex one camera connection until it ends
///
/// Frames are offered to `sink` and retried until accepted. Before every
/// header, the first included, the sink is polled and the header is only read
/// once it reports room.
pub async fn receive_stream<R>(
    mut reader: R,
    sink: &dyn FrameSink,
    state_listener: &Weak<dyn StreamStateListener>,
    retry: &RetryTimer,
    options: &ReceiverOptions,
    stats: &ReceiverStats,
) -> Result<StreamEnd, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut demuxer = PreviewStreamDemuxer::new(options.max_frame_size);

    loop {
        let awaiting_header = demuxer.is_awaiting_header();
        if awaiting_header && !retry.wait_until(|| sink.safe_to_read_more_data()).await {
            return Ok(StreamEnd::Cancelled);
        }
        let chunk = match read_exact(&mut reader, demuxer.expected_len(), options.read_timeout, retry).await? {
            Some(chunk) => chunk,
            None => return Ok(StreamEnd::Cancelled),
        };
        if awaiting_header {
            stats.headers_read.fetch_add(1, Ordering::Relaxed);
        }

        match demuxer.feed(chunk.freeze())? {
            DemuxEvent::StartOfStream => {
                tracing::debug!("Start of stream received");
                notify(state_listener, |l| l.start_of_stream_received());
            }
            DemuxEvent::EndOfStream => {
                tracing::debug!("End of stream received");
                notify(state_listener, |l| l.end_of_stream_received());
                return Ok(StreamEnd::EndOfStream);
            }
            DemuxEvent::AwaitingPayload { .. } => {}
            DemuxEvent::Frame { kind, frame } => {
                stats.frames_received.fetch_add(1, Ordering::Relaxed);
                stats.bytes_received.fetch_add(frame.len() as u64, Ordering::Relaxed);

                let offered = match kind {
                    MediaKind::Video => retry.offer(frame, |f| sink.offer_video(f)).await,
                    MediaKind::Audio => retry.offer(frame, |f| sink.offer_audio(f)).await,
                };
                if offered.is_err() {
                    return Ok(StreamEnd::Cancelled);
                }
            }
        }
    }
}

/// Read exactly `len` bytes; `None` if cancelled first
async fn read_exact<R>(
    reader: &mut R,
    len: usize,
    timeout: Duration,
    retry: &RetryTimer,
) -> Result<Option<BytesMut>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = BytesMut::zeroed(len);
    let read = tokio::select! {
        _ = retry.token().cancelled() => return Ok(None),
        read = tokio::time::timeout(timeout, reader.read_exact(&mut chunk)) => read,
    };

    match read {
        Ok(Ok(_)) => Ok(Some(chunk)),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(NetworkError::Disconnected),
        Ok(Err(e)) => Err(NetworkError::ReceiveFailed(e.to_string())),
        Err(_) => Err(NetworkError::Timeout),
    }
}
