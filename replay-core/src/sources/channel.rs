use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::chunk::RawFrame;
use crate::models::error::ReplayError;
use crate::traits::media_source::{FrameRead, FrameSource, MediaSource, SourceProvider, TrackSettings};

/// Create a bounded push-to-pull bridge for one track.
///
/// Callback-driven capture APIs push frames into the `FrameSender`; the
/// capture pipeline pulls them from the `ChannelFrameSource`. When the
/// channel is full, new frames are dropped and counted rather than blocking
/// the capture callback.
pub fn frame_channel(settings: TrackSettings, capacity: usize) -> (FrameSender, ChannelFrameSource) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        FrameSender {
            settings,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::clone(&closed),
        },
        ChannelFrameSource { settings, rx, closed },
    )
}

/// Producer half of a [`frame_channel`]. Dropping every clone ends the track.
#[derive(Clone)]
pub struct FrameSender {
    settings: TrackSettings,
    tx: Sender<RawFrame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameSender {
    /// Push a frame without blocking. Returns false if it was dropped.
    pub fn push(&self, frame: RawFrame) -> bool {
        if frame.track != self.settings.kind() {
            log::warn!("{} frame pushed into {} channel", frame.track, self.settings.kind());
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames dropped because the reader fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the reader has been cancelled or dropped.
    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End the track. Equivalent to dropping this sender.
    pub fn end(self) {}
}

/// Consumer half of a [`frame_channel`].
pub struct ChannelFrameSource {
    settings: TrackSettings,
    rx: Receiver<RawFrame>,
    closed: Arc<AtomicBool>,
}

impl FrameSource for ChannelFrameSource {
    fn settings(&self) -> TrackSettings {
        self.settings
    }

    fn next_frame(&mut self, timeout: Duration) -> FrameRead {
        if self.closed.load(Ordering::SeqCst) {
            return FrameRead::Ended;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => FrameRead::Frame(frame),
            Err(RecvTimeoutError::Timeout) => FrameRead::Pending,
            Err(RecvTimeoutError::Disconnected) => FrameRead::Ended,
        }
    }

    fn cancel(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Swap out the live receiver so producers observe the disconnect.
        self.rx = crossbeam_channel::never();
    }
}

impl Drop for ChannelFrameSource {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A media source assembled from channel-backed tracks.
pub struct ChannelMediaSource {
    label: String,
    video: Option<ChannelFrameSource>,
    audio: Option<ChannelFrameSource>,
    released: Arc<AtomicBool>,
}

impl ChannelMediaSource {
    pub fn new(video: Option<ChannelFrameSource>, audio: Option<ChannelFrameSource>) -> Self {
        Self {
            label: "channel source".to_string(),
            video,
            audio,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Flag set once the owning session releases the source.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

impl MediaSource for ChannelMediaSource {
    fn take_video(&mut self) -> Option<Box<dyn FrameSource>> {
        self.video.take().map(|s| Box::new(s) as Box<dyn FrameSource>)
    }

    fn take_audio(&mut self) -> Option<Box<dyn FrameSource>> {
        self.audio.take().map(|s| Box::new(s) as Box<dyn FrameSource>)
    }

    fn release(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        for track in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            track.cancel();
        }
        log::debug!("{} released", self.label);
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Provider that hands out a source offered by the embedder, once.
///
/// `acquire` fails with `NoSource` until something is offered; each offered
/// source is consumed by exactly one session.
#[derive(Default)]
pub struct SourceSlot {
    slot: Mutex<Option<Box<dyn MediaSource>>>,
}

impl SourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a source for the next session, replacing any unclaimed one.
    pub fn offer(&self, source: Box<dyn MediaSource>) {
        if let Some(mut previous) = self.slot.lock().replace(source) {
            previous.release();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl SourceProvider for SourceSlot {
    fn acquire(&self) -> Result<Box<dyn MediaSource>, ReplayError> {
        self.slot.lock().take().ok_or(ReplayError::NoSource)
    }
}
