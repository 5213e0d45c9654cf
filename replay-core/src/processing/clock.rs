use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic microsecond clock shared by every track of a session.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall-independent session clock starting at zero when created.
#[derive(Debug, Clone)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SessionClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to. Useful for deterministic replay of
/// recorded frame sequences and for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Maps one track's source timestamps onto the session clock.
///
/// The offset is fixed on the first frame, so later frames keep the source's
/// own spacing while both tracks land on one comparable timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineMapper {
    offset_us: Option<i64>,
}

impl TimelineMapper {
    pub fn new() -> Self {
        Self { offset_us: None }
    }

    pub fn map(&mut self, clock: &dyn Clock, source_timestamp_us: u64) -> u64 {
        let offset = *self
            .offset_us
            .get_or_insert_with(|| clock.now_us() as i64 - source_timestamp_us as i64);
        (source_timestamp_us as i64 + offset).max(0) as u64
    }

    pub fn is_anchored(&self) -> bool {
        self.offset_us.is_some()
    }
}

/// Exponential moving average of frame spacing, used to report the measured
/// frame rate of a live track.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRateEstimator {
    last_timestamp_us: Option<u64>,
    mean_interval_us: Option<f64>,
}

impl FrameRateEstimator {
    const SMOOTHING: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, timestamp_us: u64) {
        if let Some(last) = self.last_timestamp_us {
            if timestamp_us > last {
                let interval = (timestamp_us - last) as f64;
                self.mean_interval_us = Some(match self.mean_interval_us {
                    Some(mean) => mean + Self::SMOOTHING * (interval - mean),
                    None => interval,
                });
            }
        }
        self.last_timestamp_us = Some(timestamp_us);
    }

    /// Frames per second, once at least two frames have been seen.
    pub fn frame_rate(&self) -> Option<f64> {
        self.mean_interval_us
            .filter(|mean| *mean > 0.0)
            .map(|mean| 1_000_000.0 / mean)
    }

    /// Restart measurement after a gap (e.g. a pause) so the gap is not
    /// counted as one very long frame.
    pub fn reset_gap(&mut self) {
        self.last_timestamp_us = None;
    }
}
