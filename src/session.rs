//! Preview session controller
//!
//! Ties the REST control calls, the TCP receiver, the frame buffer and both
//! pacers into one lifecycle:
//!
//! ```text
//! Idle ──start_preview_for──▶ Starting ──REST ok──▶ Buffering ──watermark──▶ Playing
//!  ▲                             │ REST failed                                 │
//!  └─────────────────────────────┴──────────── Stopping ◀── stop / drained ◀───┘
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

use crate::buffer::{BufferListener, FrameBuffer};
use crate::config::PreviewConfig;
use crate::control::{CameraControl, PreviewRequest};
use crate::error::{Error, NetworkError, Result};
use crate::media::MediaItem;
use crate::network::receiver::{PortBinder, PreviewStreamReceiver, ReceiverStats, StreamStateListener};
use crate::network::socket::bind_tcp_listener;
use crate::playback::{AudioOutput, AudioPacer, VideoPacer, VideoSink};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// REST start call in flight
    Starting,
    /// Waiting for the video watermark
    Buffering,
    Playing,
    /// REST stop call in flight
    Stopping,
}

/// Presentation callbacks to the application
pub trait PreviewListener: Send + Sync {
    fn on_video_frame(&self, frame: Bytes, timestamp: f64);

    fn on_preview_start(&self);

    fn on_preview_stop(&self);

    fn on_paused_changed(&self, paused: bool);

    /// The preview could not be started or the connection failed
    fn on_preview_unavailable(&self, _error: &Error) {}
}

struct SessionInner {
    self_ref: Weak<SessionInner>,
    control: Arc<dyn CameraControl>,
    listener: Arc<dyn PreviewListener>,
    buffer: Arc<FrameBuffer>,
    receiver: Mutex<PreviewStreamReceiver>,
    video: VideoPacer,
    audio: AudioPacer,
    state: Mutex<SessionState>,
    current_item: Mutex<Option<MediaItem>>,
    end_of_stream: Arc<AtomicBool>,
    /// Bumped on every start so late auto-stops can't end a newer session
    generation: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
    handle: Handle,
}

/// Plays the preview stream of one media item at a time
pub struct PreviewSession {
    inner: Arc<SessionInner>,
}

impl PreviewSession {
    /// Create a session and start listening for the camera
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: PreviewConfig,
        control: Arc<dyn CameraControl>,
        audio_output: Arc<dyn AudioOutput>,
        listener: Arc<dyn PreviewListener>,
    ) -> Result<Self> {
        Self::with_port_binder(config, control, audio_output, listener, Box::new(bind_tcp_listener))
    }

    /// Like `new`, but listening sockets are opened through `binder`
    pub fn with_port_binder(
        config: PreviewConfig,
        control: Arc<dyn CameraControl>,
        audio_output: Arc<dyn AudioOutput>,
        listener: Arc<dyn PreviewListener>,
        binder: PortBinder,
    ) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let buffer = Arc::new(FrameBuffer::new(&config.buffer));
            let buffer_listener: Weak<dyn BufferListener> = weak.clone();
            buffer.set_listener(buffer_listener);

            let end_of_stream = Arc::new(AtomicBool::new(false));
            let mut receiver =
                PreviewStreamReceiver::with_binder(&config.network, buffer.clone(), weak.clone(), binder);
            if let Err(e) = receiver.start() {
                tracing::warn!("Preview receiver not listening yet: {}", e);
            }

            let video = VideoPacer::new(
                &config.playback,
                buffer.clone(),
                end_of_stream.clone(),
                weak.clone(),
                &handle,
            );
            let audio = AudioPacer::new(
                &config.playback,
                config.network.retry_interval(),
                buffer.clone(),
                audio_output,
                handle.clone(),
            );

            SessionInner {
                self_ref: weak.clone(),
                control,
                listener,
                buffer,
                receiver: Mutex::new(receiver),
                video,
                audio,
                state: Mutex::new(SessionState::Idle),
                current_item: Mutex::new(None),
                end_of_stream,
                generation: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                handle: handle.clone(),
            }
        });

        Ok(Self { inner })
    }

    /// Stop any running preview, then ask the camera to stream `item`
    ///
    /// Returns once the camera accepted the request; playback begins when
    /// enough video is buffered.
    pub async fn start_preview_for(&self, item: MediaItem) -> Result<()> {
        self.start_preview(PreviewRequest::start(item.id.clone(), 0), item).await
    }

    /// Like `start_preview_for`, starting `offset_secs` into the video
    /// and optionally limited to `length_secs`
    pub async fn start_preview_range(&self, item: MediaItem, offset_secs: f64, length_secs: Option<f64>) -> Result<()> {
        let mut request = PreviewRequest::start(item.id.clone(), 0).with_offset(offset_secs);
        request.length_secs = length_secs;
        self.start_preview(request, item).await
    }

    async fn start_preview(&self, mut request: PreviewRequest, item: MediaItem) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;

        inner.end_of_stream.store(false, Ordering::SeqCst);
        inner.stop_locked().await;
        inner.setup_for(&item);

        let port = match inner.ensure_listening() {
            Ok(port) => port,
            Err(e) => {
                let error = Error::from(e);
                inner.listener.on_preview_unavailable(&error);
                return Err(error);
            }
        };
        request.preview_port = port;

        inner.set_state(SessionState::Starting);
        *inner.current_item.lock() = Some(item);
        inner.generation.fetch_add(1, Ordering::SeqCst);

        match inner.control.set_preview(request).await {
            Ok(()) => {
                inner.set_state(SessionState::Buffering);
                inner.buffer.enable_writes();
                tracing::info!("Preview requested on port {}", port);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to start preview: {}", e);
                *inner.current_item.lock() = None;
                inner.set_state(SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Stop playback and, if a preview is active, ask the camera to stop streaming
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.stop_locked().await;
    }

    /// Toggle pause while playing; returns whether playback is now paused
    ///
    /// Does nothing before the watermark is reached or once stopped.
    pub fn pause(&self) -> bool {
        let state = self.state();
        if state != SessionState::Playing {
            tracing::debug!("Pause ignored while {:?}", state);
            return self.inner.video.is_paused();
        }
        let paused = self.inner.video.pause();
        if let Err(e) = self.inner.audio.pause() {
            tracing::debug!("Audio pause toggle ignored: {}", e);
        }
        self.inner.listener.on_paused_changed(paused);
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.inner.video.is_paused()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Get the item currently being previewed
    pub fn current_item(&self) -> Option<MediaItem> {
        self.inner.current_item.lock().clone()
    }

    /// Get the port the camera is told to connect to
    pub fn listening_port(&self) -> Option<u16> {
        self.inner.receiver.lock().listening_port()
    }

    pub fn frame_buffer(&self) -> &Arc<FrameBuffer> {
        &self.inner.buffer
    }

    /// Handle for the audio output's buffer callbacks
    pub fn audio_pacer(&self) -> AudioPacer {
        self.inner.audio.clone()
    }

    pub fn receiver_stats(&self) -> Arc<ReceiverStats> {
        self.inner.receiver.lock().stats()
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.inner.video.shutdown();
        self.inner.receiver.lock().stop();
    }
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::debug!("Preview session {:?} -> {:?}", previous, state);
        }
    }

    fn ensure_listening(&self) -> std::result::Result<u16, NetworkError> {
        let mut receiver = self.receiver.lock();
        match receiver.listening_port() {
            Some(port) => Ok(port),
            None => receiver.start(),
        }
    }

    fn setup_for(&self, item: &MediaItem) {
        if let Some(framerate) = item.preview_framerate() {
            self.video.set_framerate(framerate);
        }
        let modifier = 1.0 / item.slow_down_rate() as f64;
        if let Err(e) = self.audio.initialize(modifier) {
            tracing::warn!("Preview audio unavailable: {}", e);
        }
    }

    /// Caller holds the lifecycle lock
    async fn stop_locked(&self) {
        self.video.stop();
        if let Err(e) = self.audio.stop() {
            tracing::debug!("Audio stop failed: {}", e);
        }
        self.buffer.clear();

        let item = self.current_item.lock().take();
        if let Some(item) = item {
            self.set_state(SessionState::Stopping);
            let port = self.receiver.lock().listening_port().unwrap_or_default();
            if let Err(e) = self.control.set_preview(PreviewRequest::stop(item.id, port)).await {
                tracing::warn!("Failed to stop preview: {}", e);
            }
        }

        self.end_of_stream.store(false, Ordering::SeqCst);
        self.receiver.lock().stop_receiving();
        self.set_state(SessionState::Idle);
        self.listener.on_preview_stop();
    }

    /// Stop unless a newer session was started meanwhile. Returns whether it stopped.
    async fn stop_if_current(&self, generation: u64) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let active = self.current_item.lock().is_some();
        if !active || self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.stop_locked().await;
        true
    }

    fn spawn_stop(&self, reason: Option<Error>) {
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };
        let generation = self.generation.load(Ordering::SeqCst);
        self.handle.spawn(async move {
            if inner.stop_if_current(generation).await {
                if let Some(error) = reason {
                    inner.listener.on_preview_unavailable(&error);
                }
            }
        });
    }

    /// Move from Buffering to Playing and start both pacers
    fn begin_playback(&self, trigger: &str) {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Buffering {
                tracing::debug!("{} while {:?}, ignoring", trigger, *state);
                return;
            }
            *state = SessionState::Playing;
        }

        self.video.start();
        if let Err(e) = self.audio.start(true) {
            tracing::warn!("Preview audio did not start: {}", e);
        }
        tracing::info!("Preview playback started ({})", trigger);
        self.listener.on_preview_start();
    }
}

impl BufferListener for SessionInner {
    fn minimum_video_frames_reached(&self) {
        self.begin_playback("watermark reached");
    }
}

impl VideoSink for SessionInner {
    fn present_video_frame(&self, frame: Bytes, timestamp: f64) {
        self.listener.on_video_frame(frame, timestamp);
    }

    fn stream_drained(&self) {
        tracing::debug!("Preview stream drained, stopping");
        self.spawn_stop(None);
    }
}

impl StreamStateListener for SessionInner {
    fn preview_did_connect(&self) {
        tracing::debug!("Preview receiver connected");
    }

    fn start_of_stream_received(&self) {
        tracing::debug!("Start of stream received");
    }

    fn end_of_stream_received(&self) {
        self.end_of_stream.store(true, Ordering::SeqCst);
        // Clips shorter than the watermark
        self.begin_playback("end of stream");
    }

    fn preview_did_disconnect(&self, reason: Option<&NetworkError>) {
        match reason {
            None => tracing::debug!("Preview receiver disconnected"),
            Some(e) => {
                tracing::warn!("Preview connection lost: {}", e);
                self.spawn_stop(Some(Error::Network(e.clone())));
            }
        }
    }
}
