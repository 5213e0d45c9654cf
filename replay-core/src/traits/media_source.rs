use std::time::Duration;

use crate::models::chunk::{RawFrame, TrackKind};
use crate::models::error::ReplayError;

/// Geometry or sample layout advertised by a live track before any frame arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackSettings {
    Video {
        width: u32,
        height: u32,
        /// Nominal frame rate, if the source reports one.
        frame_rate: Option<f64>,
    },
    Audio { sample_rate: u32, channels: u16 },
}

impl TrackSettings {
    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Video { .. } => TrackKind::Video,
            Self::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// Result of one pull from a live track.
#[derive(Debug)]
pub enum FrameRead {
    Frame(RawFrame),
    /// No frame arrived within the timeout; the track may still be alive.
    Pending,
    /// The track has ended and will never yield another frame.
    Ended,
}

/// Pull-based reader over one track of a live source.
///
/// Readers are driven from a dedicated pipeline thread, so `next_frame`
/// may block up to `timeout`.
pub trait FrameSource: Send {
    fn settings(&self) -> TrackSettings;

    /// Wait up to `timeout` for the next raw frame.
    fn next_frame(&mut self, timeout: Duration) -> FrameRead;

    /// Stop reading and release the underlying reader. Must be idempotent.
    fn cancel(&mut self);
}

/// A capturable live media source exposing separate video and audio tracks.
///
/// Each track reader can be taken exactly once; the capture session that took
/// them is their sole consumer.
pub trait MediaSource: Send {
    fn take_video(&mut self) -> Option<Box<dyn FrameSource>>;

    fn take_audio(&mut self) -> Option<Box<dyn FrameSource>>;

    /// Release the source. Must be idempotent.
    fn release(&mut self);

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "live source".to_string()
    }
}

/// Acquires the live source when a capture session starts.
///
/// Implemented by whatever detects the page or device context; returns
/// `ReplayError::NoSource` when nothing capturable is present.
pub trait SourceProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn MediaSource>, ReplayError>;
}
