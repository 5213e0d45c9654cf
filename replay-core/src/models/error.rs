use thiserror::Error;

use super::chunk::TrackKind;

/// Errors that can occur while capturing, retaining or materializing replay data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// No capturable live media source is available.
    #[error("no live media source available")]
    NoSource,

    /// No codec in the preference list is supported for this track.
    #[error("no supported codec available for {0} track")]
    NoCodecAvailable(TrackKind),

    /// A single codec was rejected by the encoder backend.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// An encoder emitted a timestamp that does not advance the track timeline.
    #[error("out-of-order {track} chunk: {received_us}us after {previous_us}us")]
    OutOfOrderChunk {
        track: TrackKind,
        previous_us: u64,
        received_us: u64,
    },

    /// Nothing to anchor a clip to yet.
    #[error("no sync point retained yet")]
    NoSyncPoint,

    /// One track's frame supply ended while the other continues.
    #[error("{0} track degraded")]
    TrackDegraded(TrackKind),

    #[error("decoder configuration missing for {0} track")]
    MissingDecoderConfig(TrackKind),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("muxing failed: {0}")]
    MuxingFailed(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ReplayError {
    /// Whether the caller can simply retry later without restarting the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoSyncPoint | Self::TrackDegraded(_) | Self::UnsupportedCodec(_)
        )
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoSyncPoint | Self::MissingDecoderConfig(_) | Self::MuxingFailed(_) => {
                "No replay available yet".to_string()
            }
            Self::NoSource => "No live video found on this page".to_string(),
            Self::NoCodecAvailable(_) => "Replay is not supported in this environment".to_string(),
            other => other.to_string(),
        }
    }
}
