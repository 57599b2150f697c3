//! Recorded media items as reported by the camera
//!
//! Only the fields that influence preview playback are modelled.

use serde::{Deserialize, Serialize};

/// Mode a media item was recorded in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Normal,
    SlowMotion,
    TimeLapse,
    NightLapse,
    Single,
    Burst,
    Continuous,
    #[default]
    #[serde(other)]
    Unsupported,
}

/// Resolution a media item was recorded at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "16MP")]
    Image16Mp,
    #[serde(rename = "8MP")]
    Image8Mp,
    #[serde(rename = "4k")]
    Uhd4k,
    #[serde(rename = "2.7k")]
    Wqhd2k7,
    #[serde(rename = "1080p")]
    Fhd1080p,
    #[serde(rename = "720p")]
    Hd720p,
    #[serde(rename = "wvga")]
    Wvga,
    #[default]
    #[serde(rename = "unsupported", other)]
    Unsupported,
}

/// A photo or video stored on the camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub mode: RecordingMode,
    #[serde(default)]
    pub resolution: Resolution,
    /// Recording framerate; only videos carry one
    #[serde(rename = "framerate_fps", default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,
}

impl MediaItem {
    pub fn video(id: impl Into<String>, mode: RecordingMode, resolution: Resolution, framerate: u32) -> Self {
        Self {
            id: id.into(),
            mode,
            resolution,
            framerate: Some(framerate),
        }
    }

    pub fn is_video(&self) -> bool {
        self.framerate.is_some()
    }

    /// Factor by which slow-motion footage plays back slower than recorded
    pub fn slow_down_rate(&self) -> u32 {
        if !self.is_video() || self.mode != RecordingMode::SlowMotion {
            return 1;
        }
        match self.resolution {
            Resolution::Fhd1080p => 2,
            Resolution::Hd720p => 4,
            Resolution::Wvga => 6,
            _ => 1,
        }
    }

    /// Framerate the preview should be presented at, for videos
    pub fn preview_framerate(&self) -> Option<f64> {
        self.framerate
            .map(|fps| fps as f64 / self.slow_down_rate() as f64)
    }
}
