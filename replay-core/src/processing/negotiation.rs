use std::sync::Arc;

use crate::models::config::ReplayConfiguration;
use crate::models::error::ReplayError;
use crate::processing::pcm::PcmEncoderFactory;
use crate::traits::media_source::TrackSettings;
use crate::traits::track_encoder::{AudioParameters, EncoderFactory, TrackEncoder, TrackParameters, VideoParameters};

/// Ordered set of encoder backends. The first backend that accepts a codec builds it.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    factories: Vec<Arc<dyn EncoderFactory>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends (PCM audio).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PcmEncoderFactory));
        registry
    }

    /// Add a backend. Backends registered earlier take precedence.
    pub fn register(&mut self, factory: Arc<dyn EncoderFactory>) {
        self.factories.push(factory);
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.name().to_string()).collect()
    }

    /// Build an encoder for `params` from the first backend that supports it.
    pub fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError> {
        let mut last_error = ReplayError::UnsupportedCodec(params.codec_name());
        for factory in &self.factories {
            match factory.create(params) {
                Ok(encoder) => {
                    log::debug!("{} backend configured {} encoder", factory.name(), params.codec_name());
                    return Ok(encoder);
                }
                Err(ReplayError::UnsupportedCodec(_)) => continue,
                Err(e) => {
                    log::warn!(
                        "{} backend failed to configure {}: {}",
                        factory.name(),
                        params.codec_name(),
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Encoder parameters for each video codec in preference order.
pub fn video_candidates(config: &ReplayConfiguration, settings: &TrackSettings) -> Vec<TrackParameters> {
    let TrackSettings::Video { width, height, frame_rate } = *settings else {
        return Vec::new();
    };
    config
        .video_codecs
        .iter()
        .map(|&codec| {
            TrackParameters::Video(VideoParameters {
                codec,
                width,
                height,
                bitrate_bps: config.video_bitrate_bps,
                frame_rate,
            })
        })
        .collect()
}

/// Encoder parameters for each audio codec in preference order.
pub fn audio_candidates(config: &ReplayConfiguration, settings: &TrackSettings) -> Vec<TrackParameters> {
    let TrackSettings::Audio { sample_rate, channels } = *settings else {
        return Vec::new();
    };
    config
        .audio_codecs
        .iter()
        .map(|&codec| {
            TrackParameters::Audio(AudioParameters {
                codec,
                sample_rate,
                channels,
                bitrate_bps: config.audio_bitrate_bps,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::decoder_config::{AudioCodec, VideoCodec};

    #[test]
    fn candidates_follow_preference_order() {
        let config = ReplayConfiguration {
            video_codecs: vec![VideoCodec::Vp9, VideoCodec::H264],
            ..Default::default()
        };
        let settings = TrackSettings::Video {
            width: 1280,
            height: 720,
            frame_rate: Some(30.0),
        };
        let candidates = video_candidates(&config, &settings);
        let names: Vec<String> = candidates.iter().map(|c| c.codec_name()).collect();
        assert_eq!(names, vec!["vp9", "h264"]);
    }

    #[test]
    fn candidates_ignore_mismatched_settings() {
        let settings = TrackSettings::Audio {
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(video_candidates(&ReplayConfiguration::default(), &settings).is_empty());
    }

    #[test]
    fn default_registry_falls_back_to_pcm() {
        let registry = EncoderRegistry::with_defaults();
        let config = ReplayConfiguration::default();
        let settings = TrackSettings::Audio {
            sample_rate: 48_000,
            channels: 1,
        };
        let candidates = audio_candidates(&config, &settings);
        assert!(matches!(
            registry.create(&candidates[0]),
            Err(ReplayError::UnsupportedCodec(_))
        ));
        assert!(registry.create(&candidates[1]).is_ok());
        assert_eq!(config.audio_codecs[1], AudioCodec::Pcm);
    }

    #[test]
    fn empty_registry_supports_nothing() {
        let registry = EncoderRegistry::new();
        let params = TrackParameters::Video(VideoParameters {
            codec: VideoCodec::Vp8,
            width: 2,
            height: 2,
            bitrate_bps: 1,
            frame_rate: None,
        });
        assert!(registry.create(&params).is_err());
        assert!(registry.backend_names().is_empty());
    }
}
