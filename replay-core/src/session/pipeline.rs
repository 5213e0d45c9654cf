use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::models::chunk::{EncoderOutput, TrackKind};
use crate::models::config::ReplayConfiguration;
use crate::models::diagnostics::TrackDiagnostics;
use crate::models::error::ReplayError;
use crate::processing::clock::Clock;
use crate::processing::encoder_adapter::TrackEncoderAdapter;
use crate::processing::negotiation::{audio_candidates, video_candidates, EncoderRegistry};
use crate::processing::retention::{BufferSnapshot, RetentionBuffer, SharedRetentionBuffer};
use crate::traits::media_source::{FrameRead, FrameSource};

/// Why a track's reader loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEnd {
    /// The pipeline was stopped.
    Stopped,
    /// The source signalled end of stream.
    SourceEnded,
    /// No frame arrived within the grace period.
    Stalled,
    /// Encoding or appending failed.
    Failed(ReplayError),
}

/// Receives track lifecycle events from pipeline worker threads.
pub trait PipelineObserver: Send + Sync {
    /// A track stopped producing chunks. `remaining` counts tracks still live.
    fn on_track_ended(&self, track: TrackKind, end: &TrackEnd, remaining: usize);

    /// A retention buffer rejected encoder output; the session must be torn down.
    fn on_fatal(&self, error: &ReplayError);
}

/// Flags shared by every worker of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineControl {
    stop: AtomicBool,
    paused: AtomicBool,
}

impl PipelineControl {
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

struct TrackWorkers {
    kind: TrackKind,
    buffer: SharedRetentionBuffer,
    diagnostics: Arc<Mutex<TrackDiagnostics>>,
    reader: Option<thread::JoinHandle<()>>,
    appender: Option<thread::JoinHandle<()>>,
}

struct ReaderContext {
    kind: TrackKind,
    source: Box<dyn FrameSource>,
    adapter: TrackEncoderAdapter,
    control: Arc<PipelineControl>,
    diagnostics: Arc<Mutex<TrackDiagnostics>>,
    observer: Arc<dyn PipelineObserver>,
    live_tracks: Arc<AtomicUsize>,
    poll_interval: Duration,
    grace_period: Duration,
}

/// Continuous capture for up to one video and one audio track.
///
/// Data flow per track:
/// ```text
/// [FrameSource] → reader thread → [TrackEncoderAdapter] ─channel→ appender thread → [RetentionBuffer]
/// ```
/// The appender is the only writer of its track's buffer; materialization
/// reads through snapshots.
pub struct CapturePipeline {
    control: Arc<PipelineControl>,
    tracks: Vec<TrackWorkers>,
    degraded_at_start: Vec<TrackKind>,
}

impl CapturePipeline {
    /// Negotiate encoders for the given tracks and start their workers.
    ///
    /// A track whose codec negotiation fails is dropped and reported through
    /// [`degraded_at_start`](Self::degraded_at_start). Fails with
    /// `NoCodecAvailable` when no track could be configured, or `NoSource`
    /// when no track was supplied at all.
    pub fn start(
        config: &ReplayConfiguration,
        registry: &EncoderRegistry,
        clock: Arc<dyn Clock>,
        video: Option<Box<dyn FrameSource>>,
        audio: Option<Box<dyn FrameSource>>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Result<Self, ReplayError> {
        if video.is_none() && audio.is_none() {
            return Err(ReplayError::NoSource);
        }

        let mut configured = Vec::new();
        let mut degraded = Vec::new();
        let mut first_failure = None;

        for (kind, source) in [(TrackKind::Video, video), (TrackKind::Audio, audio)] {
            let Some(mut source) = source else {
                continue;
            };
            let settings = source.settings();
            let candidates = match kind {
                TrackKind::Video => video_candidates(config, &settings),
                TrackKind::Audio => audio_candidates(config, &settings),
            };
            let (tx, rx) = crossbeam_channel::unbounded();
            match TrackEncoderAdapter::negotiate(
                registry,
                kind,
                candidates,
                Arc::clone(&clock),
                tx,
                config.keyframe_interval_us(),
            ) {
                Ok(adapter) => configured.push((kind, source, adapter, rx)),
                Err(e) => {
                    log::warn!("{} track disabled: {}", kind, e);
                    source.cancel();
                    degraded.push(kind);
                    first_failure.get_or_insert(e);
                }
            }
        }

        if configured.is_empty() {
            return Err(first_failure.unwrap_or(ReplayError::NoSource));
        }

        let mut pipeline = Self {
            control: Arc::new(PipelineControl::default()),
            tracks: Vec::new(),
            degraded_at_start: degraded,
        };
        let live_tracks = Arc::new(AtomicUsize::new(configured.len()));

        for (kind, source, adapter, rx) in configured {
            let buffer = RetentionBuffer::shared(kind, config.retention_window());
            let diagnostics = Arc::new(Mutex::new(TrackDiagnostics {
                codec: Some(adapter.codec_name()),
                ..Default::default()
            }));

            let appender = spawn_appender(
                kind,
                rx,
                Arc::clone(&buffer),
                Arc::clone(&diagnostics),
                Arc::clone(&pipeline.control),
                Arc::clone(&observer),
            )?;
            let reader = spawn_reader(ReaderContext {
                kind,
                source,
                adapter,
                control: Arc::clone(&pipeline.control),
                diagnostics: Arc::clone(&diagnostics),
                observer: Arc::clone(&observer),
                live_tracks: Arc::clone(&live_tracks),
                poll_interval: config.poll_interval(),
                grace_period: config.frame_grace_period(),
            });
            let (reader, spawn_error) = match reader {
                Ok(handle) => (Some(handle), None),
                Err(e) => (None, Some(e)),
            };
            // Registered before bailing out so that `Drop` joins the appender.
            pipeline.tracks.push(TrackWorkers {
                kind,
                buffer,
                diagnostics,
                reader,
                appender: Some(appender),
            });
            if let Some(e) = spawn_error {
                return Err(e);
            }
            log::info!("{} pipeline started", kind);
        }

        Ok(pipeline)
    }

    /// Tracks that were present on the source but could not be configured.
    pub fn degraded_at_start(&self) -> &[TrackKind] {
        &self.degraded_at_start
    }

    /// Tracks with running workers (or that ran before ending).
    pub fn tracks(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(|t| t.kind).collect()
    }

    /// Discard incoming frames instead of encoding them.
    pub fn pause(&self) {
        if !self.control.paused.swap(true, Ordering::SeqCst) {
            log::info!("capture paused");
        }
    }

    /// Resume encoding. The next video frame is forced to a sync point.
    pub fn resume(&self) {
        if self.control.paused.swap(false, Ordering::SeqCst) {
            log::info!("capture resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.control.is_stopped()
    }

    /// Stop all workers and wait for them. Idempotent.
    ///
    /// Safe to call from one of the pipeline's own worker threads; that
    /// thread is left to finish on its own instead of being joined.
    pub fn stop(&mut self) {
        let already = self.control.stop.swap(true, Ordering::SeqCst);
        let current = thread::current().id();
        for track in &mut self.tracks {
            // Reader first: it closes the adapter, which ends the appender's channel.
            for handle in [track.reader.take(), track.appender.take()].into_iter().flatten() {
                if handle.thread().id() == current {
                    continue;
                }
                if handle.join().is_err() {
                    log::error!("{} worker panicked", track.kind);
                }
            }
        }
        if !already {
            log::info!("capture pipeline stopped");
        }
    }

    pub fn buffer(&self, kind: TrackKind) -> Option<SharedRetentionBuffer> {
        self.tracks.iter().find(|t| t.kind == kind).map(|t| Arc::clone(&t.buffer))
    }

    /// Frozen view of one track's buffer.
    pub fn snapshot(&self, kind: TrackKind) -> Option<BufferSnapshot> {
        self.tracks
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.buffer.read().snapshot())
    }

    /// Drop every retained chunk on every track.
    pub fn clear_buffers(&self) {
        for track in &self.tracks {
            track.buffer.write().clear();
        }
    }

    pub fn diagnostics(&self, kind: TrackKind) -> TrackDiagnostics {
        let Some(track) = self.tracks.iter().find(|t| t.kind == kind) else {
            return TrackDiagnostics::default();
        };
        let mut diagnostics = track.diagnostics.lock().clone();
        let buffer = track.buffer.read();
        diagnostics.retained_chunks = buffer.len();
        diagnostics.retained_bytes = buffer.retained_bytes();
        diagnostics.retained_span_us = buffer.span_us();
        diagnostics
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader(mut ctx: ReaderContext) -> Result<thread::JoinHandle<()>, ReplayError> {
    let kind = ctx.kind;
    thread::Builder::new()
        .name(format!("replay-{}-reader", kind))
        .spawn(move || {
            let end = read_loop(&mut ctx);
            ctx.source.cancel();
            ctx.adapter.close();
            {
                let mut d = ctx.diagnostics.lock();
                d.ended = true;
            }
            if end == TrackEnd::Stopped {
                return;
            }
            let remaining = ctx.live_tracks.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            match &end {
                TrackEnd::Failed(e) => log::error!("{} track failed: {}", ctx.kind, e),
                other => log::warn!("{} track ended: {:?}", ctx.kind, other),
            }
            ctx.observer.on_track_ended(ctx.kind, &end, remaining);
        })
        .map_err(|e| ReplayError::InvalidState(format!("failed to spawn {} reader: {}", kind, e)))
}

fn read_loop(ctx: &mut ReaderContext) -> TrackEnd {
    let mut last_frame_at = Instant::now();
    let mut resumed_pending = false;

    loop {
        if ctx.control.is_stopped() {
            return TrackEnd::Stopped;
        }
        match ctx.source.next_frame(ctx.poll_interval) {
            FrameRead::Frame(frame) => {
                last_frame_at = Instant::now();
                ctx.diagnostics.lock().frames_read += 1;

                if ctx.control.is_paused() {
                    ctx.diagnostics.lock().frames_dropped_paused += 1;
                    resumed_pending = true;
                    continue;
                }
                if resumed_pending {
                    ctx.adapter.request_sync_point();
                    resumed_pending = false;
                }
                if let Err(e) = ctx.adapter.encode(&frame, false) {
                    return TrackEnd::Failed(e);
                }
            }
            FrameRead::Pending => {
                if last_frame_at.elapsed() >= ctx.grace_period {
                    return TrackEnd::Stalled;
                }
            }
            FrameRead::Ended => return TrackEnd::SourceEnded,
        }
    }
}

fn spawn_appender(
    kind: TrackKind,
    rx: Receiver<EncoderOutput>,
    buffer: SharedRetentionBuffer,
    diagnostics: Arc<Mutex<TrackDiagnostics>>,
    control: Arc<PipelineControl>,
    observer: Arc<dyn PipelineObserver>,
) -> Result<thread::JoinHandle<()>, ReplayError> {
    thread::Builder::new()
        .name(format!("replay-{}-appender", kind))
        .spawn(move || {
            // Runs until the adapter closes its sender.
            for output in rx.iter() {
                let result = match output {
                    EncoderOutput::Config(config) => buffer.write().set_decoder_config(config),
                    EncoderOutput::Chunk(chunk) => buffer.write().append(chunk).map(|evicted| {
                        let mut d = diagnostics.lock();
                        d.chunks_appended += 1;
                        d.chunks_evicted += evicted as u64;
                    }),
                };
                match result {
                    Ok(()) => {}
                    Err(e) => {
                        log::error!("{} buffer rejected encoder output: {}", kind, e);
                        control.stop.store(true, Ordering::SeqCst);
                        observer.on_fatal(&e);
                        return;
                    }
                }
            }
            log::debug!("{} appender drained", kind);
        })
        .map_err(|e| ReplayError::InvalidState(format!("failed to spawn {} appender: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk::RawFrame;
    use crate::models::decoder_config::AudioCodec;
    use crate::processing::clock::ManualClock;
    use crate::sources::channel::frame_channel;
    use crate::traits::media_source::TrackSettings;

    #[derive(Default)]
    struct Events {
        ended: Mutex<Vec<(TrackKind, TrackEnd, usize)>>,
        fatal: Mutex<Vec<ReplayError>>,
    }

    impl PipelineObserver for Events {
        fn on_track_ended(&self, track: TrackKind, end: &TrackEnd, remaining: usize) {
            self.ended.lock().push((track, end.clone(), remaining));
        }

        fn on_fatal(&self, error: &ReplayError) {
            self.fatal.lock().push(error.clone());
        }
    }

    fn audio_config() -> ReplayConfiguration {
        ReplayConfiguration {
            enable_video: false,
            audio_codecs: vec![AudioCodec::Pcm],
            poll_interval_ms: 5,
            frame_grace_period_ms: 2000,
            ..Default::default()
        }
    }

    fn audio_settings() -> TrackSettings {
        TrackSettings::Audio {
            sample_rate: 1000,
            channels: 1,
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn audio_frames_reach_the_buffer() {
        let (tx, rx) = frame_channel(audio_settings(), 64);
        let events = Arc::new(Events::default());
        let mut pipeline = CapturePipeline::start(
            &audio_config(),
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            None,
            Some(Box::new(rx)),
            events.clone(),
        )
        .unwrap();

        for i in 0..10u64 {
            // 10ms of mono audio at 1kHz
            assert!(tx.push(RawFrame::audio(1000, 1, i * 10_000, &[0.25; 10])));
        }
        assert!(wait_until(|| pipeline.diagnostics(TrackKind::Audio).chunks_appended >= 10));

        let snapshot = pipeline.snapshot(TrackKind::Audio).unwrap();
        assert_eq!(snapshot.len(), 10);
        assert!(snapshot.decoder_config().is_some());
        assert!(snapshot.chunks().iter().all(|c| c.is_sync_point));

        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.is_stopped());
        assert!(events.ended.lock().is_empty());
    }

    #[test]
    fn paused_frames_are_read_and_dropped() {
        let (tx, rx) = frame_channel(audio_settings(), 64);
        let events = Arc::new(Events::default());
        let pipeline = CapturePipeline::start(
            &audio_config(),
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            None,
            Some(Box::new(rx)),
            events,
        )
        .unwrap();

        pipeline.pause();
        pipeline.pause();
        for i in 0..5u64 {
            tx.push(RawFrame::audio(1000, 1, i * 10_000, &[0.0; 10]));
        }
        assert!(wait_until(|| pipeline.diagnostics(TrackKind::Audio).frames_dropped_paused == 5));
        pipeline.resume();
        tx.push(RawFrame::audio(1000, 1, 50_000, &[0.0; 10]));
        assert!(wait_until(|| pipeline.snapshot(TrackKind::Audio).unwrap().len() == 1));
        assert_eq!(pipeline.diagnostics(TrackKind::Audio).frames_read, 6);
    }

    #[test]
    fn ended_source_is_reported() {
        let (tx, rx) = frame_channel(audio_settings(), 4);
        let events = Arc::new(Events::default());
        let pipeline = CapturePipeline::start(
            &audio_config(),
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            None,
            Some(Box::new(rx)),
            events.clone(),
        )
        .unwrap();

        tx.end();
        assert!(wait_until(|| !events.ended.lock().is_empty()));
        assert_eq!(events.ended.lock()[0], (TrackKind::Audio, TrackEnd::SourceEnded, 0));
        assert!(pipeline.diagnostics(TrackKind::Audio).ended);
    }

    #[test]
    fn silent_source_stalls_after_grace_period() {
        let (_tx, rx) = frame_channel(audio_settings(), 4);
        let events = Arc::new(Events::default());
        let config = ReplayConfiguration {
            frame_grace_period_ms: 50,
            ..audio_config()
        };
        let _pipeline = CapturePipeline::start(
            &config,
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            None,
            Some(Box::new(rx)),
            events.clone(),
        )
        .unwrap();

        assert!(wait_until(|| !events.ended.lock().is_empty()));
        assert_eq!(events.ended.lock()[0].1, TrackEnd::Stalled);
    }

    #[test]
    fn no_tracks_is_no_source() {
        let result = CapturePipeline::start(
            &audio_config(),
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            None,
            None,
            Arc::new(Events::default()),
        );
        assert_eq!(result.err(), Some(ReplayError::NoSource));
    }

    #[test]
    fn unsupported_video_only_is_no_codec() {
        let (_tx, rx) = frame_channel(
            TrackSettings::Video {
                width: 4,
                height: 4,
                frame_rate: None,
            },
            4,
        );
        let result = CapturePipeline::start(
            &ReplayConfiguration::default(),
            &EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
            Some(Box::new(rx)),
            None,
            Arc::new(Events::default()),
        );
        assert_eq!(result.err(), Some(ReplayError::NoCodecAvailable(TrackKind::Video)));
    }
}
