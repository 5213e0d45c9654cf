use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::decoder_config::DecoderConfig;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compressed block of media for one track, as emitted by an encoder.
///
/// Chunks are immutable once created; retention buffers share them as
/// `Arc<EncodedChunk>` so snapshots never see a partially written chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub payload: Bytes,
    /// Session clock timestamp in microseconds.
    pub timestamp_us: u64,
    pub duration_us: u64,
    /// Independently decodable (video keyframe, or any audio chunk).
    pub is_sync_point: bool,
}

impl EncodedChunk {
    pub fn video(payload: impl Into<Bytes>, timestamp_us: u64, duration_us: u64, keyframe: bool) -> Self {
        Self {
            track: TrackKind::Video,
            payload: payload.into(),
            timestamp_us,
            duration_us,
            is_sync_point: keyframe,
        }
    }

    /// Audio chunks carry no inter-chunk dependency and are always sync points.
    pub fn audio(payload: impl Into<Bytes>, timestamp_us: u64, duration_us: u64) -> Self {
        Self {
            track: TrackKind::Audio,
            payload: payload.into(),
            timestamp_us,
            duration_us,
            is_sync_point: true,
        }
    }

    pub fn end_us(&self) -> u64 {
        self.timestamp_us + self.duration_us
    }
}

/// Pixel or sample layout of a raw captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Packed 8-bit BGRA, `width * height * 4` bytes.
    Bgra { width: u32, height: u32 },
    /// Interleaved little-endian f32 samples.
    PcmF32 { sample_rate: u32, channels: u16 },
}

/// One raw (uncompressed) frame pulled from a live source track.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub track: TrackKind,
    /// Timestamp on the source's own clock, in microseconds.
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub format: FrameFormat,
    pub data: Bytes,
}

impl RawFrame {
    pub fn video(width: u32, height: u32, timestamp_us: u64, duration_us: u64, data: impl Into<Bytes>) -> Self {
        Self {
            track: TrackKind::Video,
            timestamp_us,
            duration_us,
            format: FrameFormat::Bgra { width, height },
            data: data.into(),
        }
    }

    /// Builds an audio frame from interleaved f32 samples.
    pub fn audio(sample_rate: u32, channels: u16, timestamp_us: u64, samples: &[f32]) -> Self {
        let frames = samples.len() as u64 / channels.max(1) as u64;
        let duration_us = frames * 1_000_000 / sample_rate.max(1) as u64;
        let mut data = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            track: TrackKind::Audio,
            timestamp_us,
            duration_us,
            format: FrameFormat::PcmF32 { sample_rate, channels },
            data: Bytes::from(data),
        }
    }

    /// Decodes the payload of a `PcmF32` frame back into samples.
    pub fn f32_samples(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// Messages carried from a track encoder adapter to its retention buffer.
#[derive(Debug, Clone)]
pub enum EncoderOutput {
    /// Decoder configuration, sent once before the first chunk.
    Config(DecoderConfig),
    Chunk(EncodedChunk),
}
