use bytes::Bytes;

use crate::models::chunk::{RawFrame, TrackKind};
use crate::models::decoder_config::{AudioCodec, AudioDecoderConfig, DecoderConfig, VideoCodec, VideoDecoderConfig};
use crate::models::error::ReplayError;

/// Encoder settings for one video track.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub frame_rate: Option<f64>,
}

/// Encoder settings for one audio track.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParameters {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackParameters {
    Video(VideoParameters),
    Audio(AudioParameters),
}

impl TrackParameters {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Video(_) => TrackKind::Video,
            Self::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn codec_name(&self) -> String {
        match self {
            Self::Video(v) => v.codec.to_string(),
            Self::Audio(a) => a.codec.to_string(),
        }
    }

    /// Decoder configuration implied by the parameters alone, for encoders
    /// that report no codec-private data.
    pub fn implied_decoder_config(&self) -> DecoderConfig {
        match self {
            Self::Video(v) => DecoderConfig::Video(VideoDecoderConfig {
                codec: v.codec,
                width: v.width,
                height: v.height,
                description: None,
            }),
            Self::Audio(a) => DecoderConfig::Audio(AudioDecoderConfig {
                codec: a.codec,
                sample_rate: a.sample_rate,
                channels: a.channels,
                bit_depth: if a.codec == AudioCodec::Pcm { 16 } else { 0 },
                description: None,
            }),
        }
    }
}

/// One unit of output from a native encoder, tagged with the source frame it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub payload: Bytes,
    pub source_timestamp_us: u64,
    pub duration_us: u64,
    pub is_keyframe: bool,
    /// Reported alongside the first output (or whenever the encoder knows it).
    pub decoder_config: Option<DecoderConfig>,
}

/// A configured native encoder for one media kind.
///
/// Implemented by platform or library backends; wrapped by
/// `TrackEncoderAdapter`, which owns clock stamping and sync point cadence.
pub trait TrackEncoder: Send {
    /// Encode one raw frame. Encoders may buffer and return `None`.
    fn encode(&mut self, frame: &RawFrame, force_keyframe: bool) -> Result<Option<EncodedOutput>, ReplayError>;

    /// Drain any buffered output.
    fn flush(&mut self) -> Result<Vec<EncodedOutput>, ReplayError> {
        Ok(Vec::new())
    }

    /// Release native resources. Called at most once by the adapter.
    fn close(&mut self) {}
}

/// Creates native encoders for the codecs a backend supports.
pub trait EncoderFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Configure an encoder; fails with `ReplayError::UnsupportedCodec` when
    /// the backend cannot produce the requested codec.
    fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError>;
}
