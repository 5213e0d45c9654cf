use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::models::chunk::{EncodedChunk, EncoderOutput, RawFrame, TrackKind};
use crate::models::error::ReplayError;
use crate::processing::clock::{Clock, FrameRateEstimator, TimelineMapper};
use crate::processing::negotiation::EncoderRegistry;
use crate::traits::track_encoder::{EncodedOutput, TrackEncoder, TrackParameters};

/// Counters kept by one adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub frames_encoded: u64,
    pub chunks_emitted: u64,
    pub sync_points_forced: u64,
}

/// Wraps a native encoder for one track.
///
/// Converts raw frames into `EncodedChunk`s stamped on the shared session
/// clock, forces video sync points on a time cadence, and publishes the
/// track's decoder configuration before its first chunk. Output goes to the
/// track's appender over a channel.
pub struct TrackEncoderAdapter {
    track: TrackKind,
    params: TrackParameters,
    encoder: Option<Box<dyn TrackEncoder>>,
    output: Option<Sender<EncoderOutput>>,
    clock: Arc<dyn Clock>,
    timeline: TimelineMapper,
    frame_rate: FrameRateEstimator,
    keyframe_interval_us: u64,
    last_sync_source_us: Option<u64>,
    sync_requested: bool,
    config_sent: bool,
    stats: AdapterStats,
}

impl TrackEncoderAdapter {
    /// Configure an encoder for exactly these parameters.
    ///
    /// Fails with `UnsupportedCodec` when no backend can build the codec; the
    /// caller retries with the next codec in its preference list.
    pub fn configure(
        registry: &EncoderRegistry,
        params: TrackParameters,
        clock: Arc<dyn Clock>,
        output: Sender<EncoderOutput>,
        keyframe_interval_us: u64,
    ) -> Result<Self, ReplayError> {
        let encoder = registry.create(&params)?;
        log::info!("{} encoder configured with {}", params.kind(), params.codec_name());
        Ok(Self {
            track: params.kind(),
            params,
            encoder: Some(encoder),
            output: Some(output),
            clock,
            timeline: TimelineMapper::new(),
            frame_rate: FrameRateEstimator::new(),
            keyframe_interval_us,
            last_sync_source_us: None,
            sync_requested: false,
            config_sent: false,
            stats: AdapterStats::default(),
        })
    }

    /// Try each candidate in order; the first supported codec wins.
    pub fn negotiate(
        registry: &EncoderRegistry,
        track: TrackKind,
        candidates: Vec<TrackParameters>,
        clock: Arc<dyn Clock>,
        output: Sender<EncoderOutput>,
        keyframe_interval_us: u64,
    ) -> Result<Self, ReplayError> {
        for params in candidates {
            let codec = params.codec_name();
            match Self::configure(registry, params, Arc::clone(&clock), output.clone(), keyframe_interval_us) {
                Ok(adapter) => return Ok(adapter),
                Err(e) => log::warn!("{} codec {} unavailable: {}", track, codec, e),
            }
        }
        Err(ReplayError::NoCodecAvailable(track))
    }

    /// Encode one raw frame, optionally forcing a sync point.
    ///
    /// Video sync points are also forced whenever the time since the last
    /// one reaches the keyframe interval, measured on frame timestamps so the
    /// cadence holds whatever the source's actual frame rate is.
    pub fn encode(&mut self, frame: &RawFrame, force_sync_point: bool) -> Result<(), ReplayError> {
        if frame.track != self.track {
            return Err(ReplayError::InvalidState(format!(
                "{} frame sent to {} encoder",
                frame.track, self.track
            )));
        }
        let force = self.track == TrackKind::Video
            && (force_sync_point || self.sync_requested || self.sync_due(frame.timestamp_us));

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ReplayError::InvalidState(format!("{} encoder is closed", self.track)))?;
        let output = encoder.encode(frame, force)?;

        self.frame_rate.observe(frame.timestamp_us);
        self.stats.frames_encoded += 1;
        if force {
            self.sync_requested = false;
            self.stats.sync_points_forced += 1;
        }
        if let Some(output) = output {
            self.emit(output)?;
        }
        Ok(())
    }

    /// Force a sync point on the next encoded frame (e.g. after a pause).
    pub fn request_sync_point(&mut self) {
        self.sync_requested = true;
        self.frame_rate.reset_gap();
    }

    fn sync_due(&self, timestamp_us: u64) -> bool {
        match self.last_sync_source_us {
            None => true,
            Some(last) => timestamp_us.saturating_sub(last) >= self.keyframe_interval_us,
        }
    }

    fn emit(&mut self, output: EncodedOutput) -> Result<(), ReplayError> {
        let sender = self
            .output
            .as_ref()
            .ok_or_else(|| ReplayError::InvalidState(format!("{} adapter output closed", self.track)))?;

        if !self.config_sent {
            let config = output
                .decoder_config
                .clone()
                .unwrap_or_else(|| self.params.implied_decoder_config());
            sender
                .send(EncoderOutput::Config(config))
                .map_err(|_| ReplayError::InvalidState(format!("{} chunk receiver dropped", self.track)))?;
            self.config_sent = true;
        }

        let is_sync_point = self.track == TrackKind::Audio || output.is_keyframe;
        if is_sync_point && self.track == TrackKind::Video {
            self.last_sync_source_us = Some(output.source_timestamp_us);
        }
        let timestamp_us = self.timeline.map(self.clock.as_ref(), output.source_timestamp_us);
        let chunk = EncodedChunk {
            track: self.track,
            payload: output.payload,
            timestamp_us,
            duration_us: output.duration_us,
            is_sync_point,
        };
        sender
            .send(EncoderOutput::Chunk(chunk))
            .map_err(|_| ReplayError::InvalidState(format!("{} chunk receiver dropped", self.track)))?;
        self.stats.chunks_emitted += 1;
        Ok(())
    }

    /// Flush buffered output, release the encoder and close the output channel.
    ///
    /// Idempotent: the native encoder is closed exactly once.
    pub fn close(&mut self) {
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };
        match encoder.flush() {
            Ok(outputs) => {
                for output in outputs {
                    if let Err(e) = self.emit(output) {
                        log::warn!("dropping flushed {} output: {}", self.track, e);
                        break;
                    }
                }
            }
            Err(e) => log::warn!("{} encoder flush failed: {}", self.track, e),
        }
        encoder.close();
        self.output = None;
        log::debug!(
            "{} encoder closed after {} frames, {} chunks",
            self.track,
            self.stats.frames_encoded,
            self.stats.chunks_emitted
        );
    }

    pub fn is_closed(&self) -> bool {
        self.encoder.is_none()
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn parameters(&self) -> &TrackParameters {
        &self.params
    }

    pub fn codec_name(&self) -> String {
        self.params.codec_name()
    }

    /// Frame rate measured from incoming frame timestamps.
    pub fn measured_frame_rate(&self) -> Option<f64> {
        self.frame_rate.frame_rate()
    }

    /// Worst-case number of frames between sync points at the measured rate.
    pub fn frames_per_sync_point(&self) -> Option<u64> {
        self.measured_frame_rate()
            .map(|fps| (fps * self.keyframe_interval_us as f64 / 1_000_000.0).ceil() as u64)
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats
    }
}

impl Drop for TrackEncoderAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
