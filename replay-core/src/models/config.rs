use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::decoder_config::{AudioCodec, VideoCodec};
use super::error::ReplayError;

/// Shortest and longest retention windows a session may be configured with.
pub const MIN_RETENTION_SECS: f64 = 1.0;
pub const MAX_RETENTION_SECS: f64 = 60.0;

/// Resolved configuration for a replay capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfiguration {
    /// Trailing duration of media kept available, in seconds (default: 30).
    pub retention_window_secs: f64,

    /// Video codecs in order of preference; the first supported one wins.
    pub video_codecs: Vec<VideoCodec>,

    /// Audio codecs in order of preference.
    pub audio_codecs: Vec<AudioCodec>,

    /// Target video bitrate in bits per second (default: 4 Mbps).
    pub video_bitrate_bps: u32,

    /// Target audio bitrate in bits per second (default: 128 kbps).
    pub audio_bitrate_bps: u32,

    /// Maximum spacing between forced video sync points, in seconds (default: 2).
    pub keyframe_interval_secs: f64,

    /// How long a track may go without frames before it is declared ended.
    pub frame_grace_period_ms: u64,

    /// How often blocked readers wake up to check for stop requests.
    pub poll_interval_ms: u64,

    pub enable_video: bool,
    pub enable_audio: bool,

    /// Whether overlay pause signals suppress capture (default: true).
    pub honor_overlay_pause: bool,

    /// Number of staggered recorders for the legacy whole-stream strategy.
    pub legacy_recorder_count: usize,
}

impl ReplayConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_RETENTION_SECS..=MAX_RETENTION_SECS).contains(&self.retention_window_secs) {
            return Err(format!(
                "retention window must be between {} and {} seconds, got {}",
                MIN_RETENTION_SECS, MAX_RETENTION_SECS, self.retention_window_secs
            ));
        }
        if !self.enable_video && !self.enable_audio {
            return Err("at least one of video or audio capture must be enabled".into());
        }
        if self.enable_video && self.video_codecs.is_empty() {
            return Err("video codec preference list is empty".into());
        }
        if self.enable_audio && self.audio_codecs.is_empty() {
            return Err("audio codec preference list is empty".into());
        }
        if self.keyframe_interval_secs <= 0.0 || self.keyframe_interval_secs > self.retention_window_secs {
            return Err(format!(
                "keyframe interval must be positive and no longer than the retention window, got {}",
                self.keyframe_interval_secs
            ));
        }
        if self.video_bitrate_bps == 0 || self.audio_bitrate_bps == 0 {
            return Err("bitrates must be positive".into());
        }
        if self.poll_interval_ms == 0 || self.frame_grace_period_ms < self.poll_interval_ms {
            return Err("grace period must be at least one poll interval".into());
        }
        if !(1..=8).contains(&self.legacy_recorder_count) {
            return Err(format!(
                "unsupported legacy recorder count: {}",
                self.legacy_recorder_count
            ));
        }
        Ok(())
    }

    /// Parses a JSON configuration bundle; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReplayError::ConfigurationFailed(format!("invalid configuration: {}", e)))?;
        config.validate().map_err(ReplayError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs_f64(self.retention_window_secs)
    }

    pub fn retention_window_us(&self) -> u64 {
        (self.retention_window_secs * 1_000_000.0) as u64
    }

    pub fn keyframe_interval_us(&self) -> u64 {
        (self.keyframe_interval_secs * 1_000_000.0) as u64
    }

    pub fn frame_grace_period(&self) -> Duration {
        Duration::from_millis(self.frame_grace_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReplayConfiguration {
    fn default() -> Self {
        Self {
            retention_window_secs: 30.0,
            video_codecs: vec![VideoCodec::H264, VideoCodec::Vp8],
            audio_codecs: vec![AudioCodec::Opus, AudioCodec::Pcm],
            video_bitrate_bps: 4_000_000,
            audio_bitrate_bps: 128_000,
            keyframe_interval_secs: 2.0,
            frame_grace_period_ms: 3000,
            poll_interval_ms: 100,
            enable_video: true,
            enable_audio: true,
            honor_overlay_pause: true,
            legacy_recorder_count: 3,
        }
    }
}
