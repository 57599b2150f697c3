//! Fixed-rate video presentation
//!
//! A timer derived from the display refresh rate pulls one frame from the
//! frame buffer per tick and hands it to the [`VideoSink`].

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::buffer::FrameBuffer;
use crate::config::PlaybackConfig;
use crate::constants::NATIVE_REFRESH_RATE;

/// Receives paced video frames
pub trait VideoSink: Send + Sync {
    /// `timestamp` is the raw presentation timestamp divided by the pts divider
    fn present_video_frame(&self, frame: Bytes, timestamp: f64);

    /// End of stream was received and both buffers ran empty
    fn stream_drained(&self);
}

/// Number of display refreshes per presented frame
///
/// `round(native_rate / min(target_rate, max_rate))`, never less than one.
pub fn frame_interval(native_rate: f64, target_rate: f64, max_rate: f64) -> u32 {
    let rate = target_rate.min(max_rate);
    if rate.is_nan() || rate <= 0.0 {
        return 1;
    }
    let interval = (native_rate / rate).round();
    if interval < 1.0 {
        1
    } else {
        interval as u32
    }
}

/// Shortest timer period; a zero period would stall the runtime
const MIN_PERIOD: Duration = Duration::from_millis(1);

struct VideoShared {
    buffer: Arc<FrameBuffer>,
    sink: Weak<dyn VideoSink>,
    end_of_stream: Arc<AtomicBool>,
    paused: AtomicBool,
    frame_interval: AtomicU32,
    period_changed: Notify,
    native_refresh_rate: f64,
    max_framerate: f64,
    pts_divider: f64,
}

impl VideoShared {
    fn period(&self) -> Duration {
        let interval = self.frame_interval.load(Ordering::SeqCst).max(1);
        Duration::try_from_secs_f64(interval as f64 / self.native_refresh_rate)
            .unwrap_or(Duration::from_secs(1))
            .max(MIN_PERIOD)
    }

    fn tick(&self) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }
        let Some(sink) = self.sink.upgrade() else {
            return;
        };

        if let Some(frame) = self.buffer.read_video() {
            let timestamp = frame.presentation_timestamp as f64 / self.pts_divider;
            sink.present_video_frame(frame.payload, timestamp);
        }

        if self.end_of_stream.load(Ordering::SeqCst) && !self.buffer.has_data_for_reading() {
            tracing::debug!("Preview buffers drained after end of stream");
            self.paused.store(true, Ordering::SeqCst);
            sink.stream_drained();
        }
    }
}

/// Video presentation timer; created paused
pub struct VideoPacer {
    shared: Arc<VideoShared>,
    cancel: CancellationToken,
}

impl VideoPacer {
    /// Spawn the pacing task on `handle`
    pub fn new(
        config: &PlaybackConfig,
        buffer: Arc<FrameBuffer>,
        end_of_stream: Arc<AtomicBool>,
        sink: Weak<dyn VideoSink>,
        handle: &Handle,
    ) -> Self {
        let native_refresh_rate = if config.native_refresh_rate.is_finite() && config.native_refresh_rate > 0.0 {
            config.native_refresh_rate
        } else {
            tracing::warn!(
                "Invalid native refresh rate {}, using {}",
                config.native_refresh_rate,
                NATIVE_REFRESH_RATE
            );
            NATIVE_REFRESH_RATE
        };
        let shared = Arc::new(VideoShared {
            buffer,
            sink,
            end_of_stream,
            paused: AtomicBool::new(true),
            frame_interval: AtomicU32::new(frame_interval(
                native_refresh_rate,
                config.max_framerate,
                config.max_framerate,
            )),
            period_changed: Notify::new(),
            native_refresh_rate,
            max_framerate: config.max_framerate,
            pts_divider: config.pts_divider.max(1) as f64,
        });
        let cancel = CancellationToken::new();
        handle.spawn(run(shared.clone(), cancel.clone()));

        Self { shared, cancel }
    }

    /// Match the presentation rate to the content framerate
    pub fn set_framerate(&self, framerate: f64) {
        let interval = frame_interval(self.shared.native_refresh_rate, framerate, self.shared.max_framerate);
        if self.shared.frame_interval.swap(interval, Ordering::SeqCst) != interval {
            tracing::debug!("Video frame interval set to {} refreshes", interval);
            self.shared.period_changed.notify_one();
        }
    }

    /// Get the current frame interval in display refreshes
    pub fn frame_interval(&self) -> u32 {
        self.shared.frame_interval.load(Ordering::SeqCst)
    }

    /// Get the time between two presented frames
    pub fn period(&self) -> Duration {
        self.shared.period()
    }

    pub fn start(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Toggle; returns whether the pacer is now paused
    pub fn pause(&self) -> bool {
        !self.shared.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Run one tick immediately
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Stop the pacing task for good
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for VideoPacer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(shared: Arc<VideoShared>, cancel: CancellationToken) {
    loop {
        let period = shared.period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = shared.period_changed.notified() => break,
                _ = ticker.tick() => shared.tick(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Frame, FrameSink};
    use crate::config::BufferConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Screen {
        frames: Mutex<Vec<(Bytes, f64)>>,
        drained: AtomicUsize,
    }

    impl VideoSink for Screen {
        fn present_video_frame(&self, frame: Bytes, timestamp: f64) {
            self.frames.lock().push((frame, timestamp));
        }

        fn stream_drained(&self) {
            self.drained.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (VideoPacer, Arc<FrameBuffer>, Arc<AtomicBool>, Arc<Screen>) {
        let buffer = Arc::new(FrameBuffer::new(&BufferConfig::default()));
        let end_of_stream = Arc::new(AtomicBool::new(false));
        let screen = Arc::new(Screen::default());
        let sink: Weak<Screen> = Arc::downgrade(&screen);
        let pacer = VideoPacer::new(
            &PlaybackConfig::default(),
            buffer.clone(),
            end_of_stream.clone(),
            sink,
            &Handle::current(),
        );
        (pacer, buffer, end_of_stream, screen)
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(60.0, 30.0, 30.0), 2);
        assert_eq!(frame_interval(60.0, 60.0, 30.0), 2);
        assert_eq!(frame_interval(60.0, 25.0, 30.0), 2);
        assert_eq!(frame_interval(60.0, 15.0, 30.0), 4);
        assert_eq!(frame_interval(60.0, 24.0, 30.0), 3);
        assert_eq!(frame_interval(60.0, 120.0, 240.0), 1);
        assert_eq!(frame_interval(60.0, 0.0, 30.0), 1);
    }

    #[tokio::test]
    async fn test_starts_paused() {
        let (pacer, buffer, _, screen) = setup();
        buffer.offer_video(Frame::new(&b"a"[..], 90)).unwrap();

        assert!(pacer.is_paused());
        pacer.tick();
        assert!(screen.frames.lock().is_empty());
        assert_eq!(buffer.video_len(), 1);
    }

    #[tokio::test]
    async fn test_tick_presents_one_frame_with_scaled_timestamp() {
        let (pacer, buffer, _, screen) = setup();
        buffer.offer_video(Frame::new(&b"a"[..], 9000)).unwrap();
        buffer.offer_video(Frame::new(&b"b"[..], 9045)).unwrap();

        pacer.start();
        pacer.tick();

        assert_eq!(*screen.frames.lock(), vec![(Bytes::from_static(b"a"), 100.0)]);
        assert_eq!(buffer.video_len(), 1);
    }

    #[tokio::test]
    async fn test_pause_toggles() {
        let (pacer, _, _, _) = setup();
        pacer.start();

        assert!(pacer.pause());
        assert!(pacer.is_paused());
        assert!(!pacer.pause());
        assert!(!pacer.is_paused());

        pacer.stop();
        assert!(pacer.is_paused());
    }

    #[tokio::test]
    async fn test_drained_after_end_of_stream() {
        let (pacer, buffer, end_of_stream, screen) = setup();
        buffer.offer_video(Frame::new(&b"last"[..], 0)).unwrap();
        pacer.start();

        pacer.tick();
        assert_eq!(screen.drained.load(Ordering::SeqCst), 0);

        end_of_stream.store(true, Ordering::SeqCst);
        pacer.tick();
        assert_eq!(screen.drained.load(Ordering::SeqCst), 1);
        assert!(pacer.is_paused());

        pacer.tick();
        assert_eq!(screen.drained.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_drain_while_audio_remains() {
        let (pacer, buffer, end_of_stream, screen) = setup();
        buffer.offer_audio(Frame::new(&b"aac"[..], 0)).unwrap();
        end_of_stream.store(true, Ordering::SeqCst);
        pacer.start();

        pacer.tick();
        assert_eq!(screen.drained.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_framerate_changes_period() {
        let (pacer, _, _, _) = setup();
        assert_eq!(pacer.frame_interval(), 2);

        pacer.set_framerate(15.0);
        assert_eq!(pacer.frame_interval(), 4);
        assert_eq!(pacer.period(), Duration::from_secs_f64(4.0 / 60.0));
    }

    #[tokio::test]
    async fn test_invalid_refresh_rate_falls_back_to_native() {
        let buffer = Arc::new(FrameBuffer::new(&BufferConfig::default()));
        let screen = Arc::new(Screen::default());
        let sink: Weak<Screen> = Arc::downgrade(&screen);
        let config = PlaybackConfig {
            native_refresh_rate: 0.0,
            ..PlaybackConfig::default()
        };
        let pacer = VideoPacer::new(&config, buffer.clone(), Arc::new(AtomicBool::new(false)), sink, &Handle::current());

        assert_eq!(pacer.period(), Duration::from_secs_f64(2.0 / NATIVE_REFRESH_RATE));

        buffer.offer_video(Frame::new(&b"f"[..], 0)).unwrap();
        pacer.start();
        for _ in 0..100 {
            if !screen.frames.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(screen.frames.lock().len(), 1);
        pacer.shutdown();
    }

    #[tokio::test]
    async fn test_timer_drives_presentation() {
        let (pacer, buffer, _, screen) = setup();
        for pts in 0..3 {
            buffer.offer_video(Frame::new(&b"f"[..], pts)).unwrap();
        }
        pacer.set_framerate(60.0);
        pacer.start();

        for _ in 0..100 {
            if screen.frames.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(screen.frames.lock().len(), 3);
        pacer.shutdown();
    }
}
