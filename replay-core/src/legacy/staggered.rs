//! Staggered whole-stream recorders.
//!
//! A fallback for environments without frame-level encoder access: `count`
//! independent recorders each capture the whole stream for one retention
//! window and then restart. Recorder `i` first starts `i × window / count`
//! into the cycle, so at any instant one of them holds close to a full
//! window. On trigger the recorder with the longest contiguous history is
//! stopped and its recording returned as-is, so the clip may begin on any
//! frame and is never keyframe-aligned. Prefer
//! [`CaptureController`](crate::session::controller::CaptureController).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::models::clip::{ClipMetadata, MaterializedClip};
use crate::models::config::ReplayConfiguration;
use crate::models::error::ReplayError;
use crate::processing::clock::Clock;
use crate::session::materializer::sha256_hex;

/// Output of one whole-stream recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub data: Bytes,
    pub mime_type: &'static str,
}

/// A recorder that encodes the live stream into one container from start to stop.
pub trait WholeStreamRecorder: Send {
    fn start(&mut self) -> Result<(), ReplayError>;

    /// Stop recording and return everything captured since `start`.
    fn stop(&mut self) -> Result<Recording, ReplayError>;
}

struct RecorderSlot<R> {
    recorder: R,
    /// Session time the current recording began; `None` until the first start.
    started_at_us: Option<u64>,
    first_start_us: u64,
}

/// Rotates several [`WholeStreamRecorder`]s on staggered offsets.
pub struct StaggeredReplay<R: WholeStreamRecorder> {
    slots: Vec<RecorderSlot<R>>,
    window_us: u64,
    clock: Arc<dyn Clock>,
    running: bool,
}

impl<R: WholeStreamRecorder> StaggeredReplay<R> {
    pub fn new(recorders: Vec<R>, window: Duration, clock: Arc<dyn Clock>) -> Result<Self, ReplayError> {
        if recorders.is_empty() {
            return Err(ReplayError::ConfigurationFailed("at least one recorder is required".into()));
        }
        let window_us = window.as_micros() as u64;
        if window_us == 0 {
            return Err(ReplayError::ConfigurationFailed("retention window must be positive".into()));
        }
        let slots = recorders
            .into_iter()
            .map(|recorder| RecorderSlot {
                recorder,
                started_at_us: None,
                first_start_us: 0,
            })
            .collect();
        Ok(Self {
            slots,
            window_us,
            clock,
            running: false,
        })
    }

    /// Build `legacy_recorder_count` recorders with `make`, one per index.
    pub fn from_config(
        config: &ReplayConfiguration,
        clock: Arc<dyn Clock>,
        make: impl FnMut(usize) -> R,
    ) -> Result<Self, ReplayError> {
        config.validate().map_err(ReplayError::ConfigurationFailed)?;
        let recorders = (0..config.legacy_recorder_count).map(make).collect();
        Self::new(recorders, config.retention_window(), clock)
    }

    /// Spacing between recorder start offsets.
    pub fn stagger_us(&self) -> u64 {
        self.window_us / self.slots.len() as u64
    }

    pub fn recorder_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begin the cycle. Recorder 0 starts now; the rest start on their offsets
    /// as [`tick`](Self::tick) is called.
    pub fn start(&mut self) -> Result<(), ReplayError> {
        if self.running {
            return Ok(());
        }
        let now = self.clock.now_us();
        let stagger = self.stagger_us();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.first_start_us = now + i as u64 * stagger;
            slot.started_at_us = None;
        }
        self.running = true;
        log::info!("staggered replay started with {} recorders", self.slots.len());
        self.tick()
    }

    /// Start recorders whose offset has arrived and restart those that have
    /// recorded a full window. Call periodically.
    pub fn tick(&mut self) -> Result<(), ReplayError> {
        if !self.running {
            return Ok(());
        }
        let now = self.clock.now_us();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot.started_at_us {
                None if now >= slot.first_start_us => {
                    slot.recorder.start()?;
                    slot.started_at_us = Some(now);
                    log::debug!("recorder {} started", i);
                }
                Some(started) if now - started >= self.window_us => {
                    // Discard the full-window recording and begin a fresh one.
                    slot.recorder.stop()?;
                    slot.recorder.start()?;
                    slot.started_at_us = Some(now);
                    log::debug!("recorder {} restarted", i);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Index of the recorder with the longest contiguous history.
    pub fn pick(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.started_at_us.map(|started| (i, started)))
            .min_by_key(|&(i, started)| (started, i))
            .map(|(i, _)| i)
    }

    /// Hand out the picked recorder's recording and restart that recorder.
    pub fn trigger(&mut self) -> Result<MaterializedClip, ReplayError> {
        let index = self.pick().ok_or(ReplayError::NoSyncPoint)?;
        let now = self.clock.now_us();
        let slot = &mut self.slots[index];
        let started = slot.started_at_us.unwrap_or(now);

        let recording = slot.recorder.stop()?;
        slot.recorder.start()?;
        slot.started_at_us = Some(now);

        if recording.data.is_empty() {
            return Err(ReplayError::NoSyncPoint);
        }
        let duration_us = now - started;
        let checksum = sha256_hex(&recording.data);
        let metadata = ClipMetadata::new(
            duration_us as f64 / 1_000_000.0,
            recording.data.len(),
            &checksum,
            Vec::new(),
        );
        log::info!("recorder {} supplied a {:.2}s clip", index, metadata.duration_secs);
        Ok(MaterializedClip {
            data: recording.data,
            mime_type: recording.mime_type,
            window_start_us: started,
            window_end_us: now,
            duration_us,
            keyframe_aligned: false,
            metadata,
        })
    }

    /// Stop every recorder, discarding their recordings. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.started_at_us.take().is_some() {
                if let Err(e) = slot.recorder.stop() {
                    log::warn!("recorder {} failed to stop: {}", i, e);
                }
            }
        }
        log::info!("staggered replay stopped");
    }
}

impl<R: WholeStreamRecorder> Drop for StaggeredReplay<R> {
    fn drop(&mut self) {
        self.stop();
    }
}
