//! Configuration for the preview receivers, buffers and pacers
//!
//! Stored as TOML. Durations are kept as integer milliseconds so the file
//! stays readable; use the `Duration` accessors in code.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub network: NetworkConfig,
    pub buffer: BufferConfig,
    pub playback: PlaybackConfig,
}

impl PreviewConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the buffers and pacers cannot run with
    pub fn validate(&self) -> Result<()> {
        let network = &self.network;
        if network.preview_port_min > network.preview_port_max {
            return Err(invalid(format!(
                "preview port range {}..={} is empty",
                network.preview_port_min, network.preview_port_max
            )));
        }
        require_nonzero("network.read_timeout_ms", network.read_timeout_ms as usize)?;
        require_nonzero("network.max_frame_size", network.max_frame_size)?;

        let buffer = &self.buffer;
        require_nonzero("buffer.video_capacity", buffer.video_capacity)?;
        require_nonzero("buffer.audio_capacity", buffer.audio_capacity)?;
        if buffer.min_video_frames_for_start > buffer.video_capacity {
            return Err(invalid(format!(
                "buffer.min_video_frames_for_start ({}) exceeds buffer.video_capacity ({})",
                buffer.min_video_frames_for_start, buffer.video_capacity
            )));
        }

        let playback = &self.playback;
        require_positive("playback.native_refresh_rate", playback.native_refresh_rate)?;
        require_positive("playback.max_framerate", playback.max_framerate)?;
        require_positive("playback.sample_rate", playback.sample_rate)?;
        require_nonzero("playback.pts_divider", playback.pts_divider as usize)?;
        require_nonzero("playback.audio_buffer_size", playback.audio_buffer_size)?;
        require_nonzero("playback.audio_buffer_count", playback.audio_buffer_count)?;
        if playback.adts_header_size >= playback.audio_buffer_size {
            return Err(invalid(format!(
                "playback.adts_header_size ({}) must be smaller than playback.audio_buffer_size ({})",
                playback.adts_header_size, playback.audio_buffer_size
            )));
        }
        Ok(())
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/camera-preview/preview.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "camera-sdk", "camera-preview")
            .map(|dirs| dirs.config_dir().join("preview.toml"))
    }

    /// Load from the default path, falling back to defaults when there is no file
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::Config(message)
}

fn require_nonzero(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(invalid(format!("{} must be non-zero", name)));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(format!("{} must be a positive number, got {}", name, value)));
    }
    Ok(())
}

/// Socket and receive-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the viewfinder stream is received on
    pub viewfinder_port: u16,
    /// First port tried for the preview listening socket
    pub preview_port_min: u16,
    /// Last port tried for the preview listening socket (inclusive)
    pub preview_port_max: u16,
    /// Socket read timeout
    pub read_timeout_ms: u64,
    /// Delay between backpressure and starvation retries
    pub retry_interval_ms: u64,
    /// Upper bound accepted for a preview frame size field
    pub max_frame_size: usize,
    /// UDP receive buffer size requested from the OS
    pub recv_buffer_size: usize,
}

impl NetworkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn preview_ports(&self) -> std::ops::RangeInclusive<u16> {
        self.preview_port_min..=self.preview_port_max
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            viewfinder_port: DEFAULT_VIEWFINDER_PORT,
            preview_port_min: MIN_PREVIEW_LISTENING_PORT,
            preview_port_max: MAX_PREVIEW_LISTENING_PORT,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            max_frame_size: MAX_PREVIEW_FRAME_SIZE,
            recv_buffer_size: 1024 * 1024,
        }
    }
}

/// Frame buffer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub video_capacity: usize,
    pub audio_capacity: usize,
    /// Video frames buffered before playback begins
    pub min_video_frames_for_start: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            video_capacity: VIDEO_BUFFER_CAPACITY,
            audio_capacity: AUDIO_BUFFER_CAPACITY,
            min_video_frames_for_start: MIN_VIDEO_FRAMES_FOR_START,
        }
    }
}

/// Video and audio pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Refresh rate the video timer divides down from
    pub native_refresh_rate: f64,
    /// Fastest presentation rate regardless of the content framerate
    pub max_framerate: f64,
    /// Raw presentation timestamp units per reported unit
    pub pts_divider: u32,
    pub sample_rate: f64,
    /// Bytes per hardware audio buffer
    pub audio_buffer_size: usize,
    pub audio_buffer_count: usize,
    pub adts_header_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            native_refresh_rate: NATIVE_REFRESH_RATE,
            max_framerate: MAX_PREVIEW_FRAMERATE,
            pts_divider: PTS_DIVIDER,
            sample_rate: DEFAULT_SAMPLE_RATE,
            audio_buffer_size: AUDIO_OUTPUT_BUFFER_SIZE,
            audio_buffer_count: AUDIO_OUTPUT_BUFFER_COUNT,
            adts_header_size: ADTS_HEADER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = PreviewConfig::default();
        assert_eq!(config.network.preview_ports(), 4010..=4099);
        assert_eq!(config.network.retry_interval(), Duration::from_millis(300));
        assert_eq!(config.buffer.video_capacity, 2000);
        assert_eq!(config.buffer.audio_capacity, 8000);
        assert_eq!(config.playback.adts_header_size, 7);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PreviewConfig = toml::from_str(
            "[buffer]\nmin_video_frames_for_start = 10\n\n[network]\nretry_interval_ms = 50\n",
        )
        .unwrap();

        assert_eq!(config.buffer.min_video_frames_for_start, 10);
        assert_eq!(config.buffer.video_capacity, VIDEO_BUFFER_CAPACITY);
        assert_eq!(config.network.retry_interval_ms, 50);
        assert_eq!(config.network.viewfinder_port, DEFAULT_VIEWFINDER_PORT);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("camera-preview-config-{}", std::process::id()));
        let path = dir.join("preview.toml");

        let mut config = PreviewConfig::default();
        config.playback.max_framerate = 25.0;
        config.save(&path).unwrap();

        let loaded = PreviewConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(PreviewConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let cases: [fn(&mut PreviewConfig); 14] = [
            |c| c.buffer.video_capacity = 0,
            |c| c.buffer.audio_capacity = 0,
            |c| c.buffer.min_video_frames_for_start = c.buffer.video_capacity + 1,
            |c| c.playback.native_refresh_rate = 0.0,
            |c| c.playback.native_refresh_rate = f64::INFINITY,
            |c| c.playback.max_framerate = f64::NAN,
            |c| c.playback.sample_rate = -48000.0,
            |c| c.playback.pts_divider = 0,
            |c| c.playback.audio_buffer_size = 0,
            |c| c.playback.audio_buffer_count = 0,
            |c| c.playback.adts_header_size = c.playback.audio_buffer_size,
            |c| c.network.preview_port_min = c.network.preview_port_max + 1,
            |c| c.network.read_timeout_ms = 0,
            |c| c.network.max_frame_size = 0,
        ];

        for (i, break_config) in cases.iter().enumerate() {
            let mut config = PreviewConfig::default();
            break_config(&mut config);
            assert!(
                matches!(config.validate(), Err(Error::Config(_))),
                "case {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_load_rejects_zero_capacity() {
        let dir = std::env::temp_dir().join(format!("camera-preview-zero-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("preview.toml");
        std::fs::write(&path, "[buffer]\nvideo_capacity = 0\n").unwrap();

        assert!(matches!(PreviewConfig::load(&path), Err(Error::Config(_))));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = std::env::temp_dir().join(format!("camera-preview-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("preview.toml");
        std::fs::write(&path, "[network\n").unwrap();

        assert!(matches!(PreviewConfig::load(&path), Err(Error::Config(_))));

        let _ = std::fs::remove_dir_all(dir);
    }
}
