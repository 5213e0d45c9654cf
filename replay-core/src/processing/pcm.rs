use bytes::Bytes;

use crate::models::chunk::{FrameFormat, RawFrame};
use crate::models::decoder_config::{AudioCodec, AudioDecoderConfig, DecoderConfig};
use crate::models::error::ReplayError;
use crate::traits::track_encoder::{AudioParameters, EncodedOutput, EncoderFactory, TrackEncoder, TrackParameters};

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
///
/// Clamps out-of-range values. Output length = `samples.len() * 2` bytes.
pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let int16_value = (clamped * i16::MAX as f32) as i16;
        data.extend_from_slice(&int16_value.to_le_bytes());
    }
    data
}

/// Uncompressed s16le audio "encoder".
///
/// Always available, so audio codec negotiation has a guaranteed fallback.
#[derive(Debug)]
pub struct PcmEncoder {
    params: AudioParameters,
    config_sent: bool,
}

impl PcmEncoder {
    pub fn new(params: AudioParameters) -> Result<Self, ReplayError> {
        if params.codec != AudioCodec::Pcm {
            return Err(ReplayError::UnsupportedCodec(params.codec.to_string()));
        }
        Ok(Self {
            params,
            config_sent: false,
        })
    }
}

impl TrackEncoder for PcmEncoder {
    fn encode(&mut self, frame: &RawFrame, _force_keyframe: bool) -> Result<Option<EncodedOutput>, ReplayError> {
        let FrameFormat::PcmF32 { sample_rate, channels } = frame.format else {
            return Err(ReplayError::EncodingFailed("pcm encoder received a video frame".into()));
        };
        if sample_rate != self.params.sample_rate || channels != self.params.channels {
            return Err(ReplayError::EncodingFailed(format!(
                "audio format changed to {}Hz/{}ch, encoder configured for {}Hz/{}ch",
                sample_rate, channels, self.params.sample_rate, self.params.channels
            )));
        }
        if frame.data.is_empty() {
            return Ok(None);
        }

        let decoder_config = if self.config_sent {
            None
        } else {
            self.config_sent = true;
            Some(DecoderConfig::Audio(AudioDecoderConfig {
                codec: AudioCodec::Pcm,
                sample_rate,
                channels,
                bit_depth: 16,
                description: None,
            }))
        };

        Ok(Some(EncodedOutput {
            payload: Bytes::from(convert_to_int16_pcm(&frame.f32_samples())),
            source_timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            is_keyframe: true,
            decoder_config,
        }))
    }
}

/// Factory for `PcmEncoder`; rejects every other codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmEncoderFactory;

impl EncoderFactory for PcmEncoderFactory {
    fn name(&self) -> &str {
        "pcm"
    }

    fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError> {
        match params {
            TrackParameters::Audio(audio) if audio.codec == AudioCodec::Pcm => {
                Ok(Box::new(PcmEncoder::new(audio.clone())?))
            }
            other => Err(ReplayError::UnsupportedCodec(other.codec_name())),
        }
    }
}
