use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::chunk::TrackKind;

/// Video codecs the engine knows how to negotiate and mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    /// Matroska `CodecID` for this codec.
    pub fn matroska_id(&self) -> &'static str {
        match self {
            Self::H264 => "V_MPEG4/ISO/AVC",
            Self::Vp8 => "V_VP8",
            Self::Vp9 => "V_VP9",
            Self::Av1 => "V_AV1",
        }
    }

    /// Whether the codec may be stored in a WebM (as opposed to full Matroska) file.
    pub fn is_webm_compatible(&self) -> bool {
        !matches!(self, Self::H264)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::H264 => "h264",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
        };
        f.write_str(name)
    }
}

/// Audio codecs the engine knows how to negotiate and mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    /// Signed 16-bit little-endian PCM.
    Pcm,
}

impl AudioCodec {
    pub fn matroska_id(&self) -> &'static str {
        match self {
            Self::Opus => "A_OPUS",
            Self::Pcm => "A_PCM/INT/LIT",
        }
    }

    pub fn is_webm_compatible(&self) -> bool {
        matches!(self, Self::Opus)
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opus => "opus",
            Self::Pcm => "pcm",
        };
        f.write_str(name)
    }
}

/// What a decoder needs to reconstruct a standalone video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Codec-private data (an `avcC` record for H.264).
    pub description: Option<Bytes>,
}

/// What a decoder needs to reconstruct a standalone audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderConfig {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per sample for PCM, 0 for compressed codecs.
    pub bit_depth: u16,
    /// Codec-private data (an `OpusHead` for Opus).
    pub description: Option<Bytes>,
}

/// Decoder configuration for one track, captured from the encoder's first output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    Video(VideoDecoderConfig),
    Audio(AudioDecoderConfig),
}

impl DecoderConfig {
    pub fn track(&self) -> TrackKind {
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

    pub fn matroska_id(&self) -> &'static str {
        match self {
            Self::Video(v) => v.codec.matroska_id(),
            Self::Audio(a) => a.codec.matroska_id(),
        }
    }

    pub fn description(&self) -> Option<&Bytes> {
        match self {
            Self::Video(v) => v.description.as_ref(),
            Self::Audio(a) => a.description.as_ref(),
        }
    }

    pub fn is_webm_compatible(&self) -> bool {
        match self {
            Self::Video(v) => v.codec.is_webm_compatible(),
            Self::Audio(a) => a.codec.is_webm_compatible(),
        }
    }
}
