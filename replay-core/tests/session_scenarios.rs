//! End-to-end capture sessions driven through channel-backed sources with a
//! scripted video encoder and the built-in PCM audio encoder.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use replay_core::container::demux::demux;
use replay_core::{
    frame_channel, AudioCodec, CaptureController, ChannelMediaSource, EncodedChunk, EncodedOutput, EncoderFactory,
    EncoderRegistry, FrameSender, ManualClock, MaterializedClip, RawFrame, ReplayConfiguration, ReplayDelegate,
    MediaSource, ReplayError, RetentionBuffer, SessionState, SourceProvider, SourceSlot, StartOutcome, TrackEncoder, TrackKind, TrackParameters,
    TrackSettings, VideoCodec,
};

const FRAME_US: u64 = 100_000;
const VIDEO_PAYLOAD_LEN: usize = 8;

/// VP8 stand-in: every output repeats the frame's first byte and is a
/// keyframe exactly when one was forced.
struct ScriptedVideoEncoder {
    closes: Arc<AtomicUsize>,
}

impl TrackEncoder for ScriptedVideoEncoder {
    fn encode(&mut self, frame: &RawFrame, force_keyframe: bool) -> Result<Option<EncodedOutput>, ReplayError> {
        Ok(Some(EncodedOutput {
            payload: Bytes::from(vec![frame.data[0]; VIDEO_PAYLOAD_LEN]),
            source_timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            is_keyframe: force_keyframe,
            decoder_config: None,
        }))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedVideoFactory {
    closes: Arc<AtomicUsize>,
}

impl EncoderFactory for ScriptedVideoFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError> {
        match params {
            TrackParameters::Video(video) if video.codec == VideoCodec::Vp8 => Ok(Box::new(ScriptedVideoEncoder {
                closes: Arc::clone(&self.closes),
            })),
            other => Err(ReplayError::UnsupportedCodec(other.codec_name())),
        }
    }
}

/// Emits its third output with the first frame's timestamp.
struct RewindingEncoder {
    outputs: usize,
    first_timestamp_us: Option<u64>,
    closes: Arc<AtomicUsize>,
}

impl TrackEncoder for RewindingEncoder {
    fn encode(&mut self, frame: &RawFrame, force_keyframe: bool) -> Result<Option<EncodedOutput>, ReplayError> {
        self.outputs += 1;
        let first = *self.first_timestamp_us.get_or_insert(frame.timestamp_us);
        let source_timestamp_us = if self.outputs == 3 { first } else { frame.timestamp_us };
        Ok(Some(EncodedOutput {
            payload: Bytes::from(vec![frame.data[0]; VIDEO_PAYLOAD_LEN]),
            source_timestamp_us,
            duration_us: frame.duration_us,
            is_keyframe: force_keyframe,
            decoder_config: None,
        }))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RewindingFactory {
    closes: Arc<AtomicUsize>,
}

impl EncoderFactory for RewindingFactory {
    fn name(&self) -> &str {
        "rewinding"
    }

    fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError> {
        match params {
            TrackParameters::Video(video) if video.codec == VideoCodec::Vp8 => Ok(Box::new(RewindingEncoder {
                outputs: 0,
                first_timestamp_us: None,
                closes: Arc::clone(&self.closes),
            })),
            other => Err(ReplayError::UnsupportedCodec(other.codec_name())),
        }
    }
}

/// Hands out the slot's source, but asks the controller to stop first, as a
/// page navigating away mid-acquisition would.
struct StopDuringAcquire {
    slot: Arc<SourceSlot>,
    controller: Mutex<Weak<CaptureController>>,
}

impl SourceProvider for StopDuringAcquire {
    fn acquire(&self) -> Result<Box<dyn MediaSource>, ReplayError> {
        if let Some(controller) = self.controller.lock().upgrade() {
            controller.stop();
        }
        self.slot.acquire()
    }
}

#[derive(Default)]
struct RecordingDelegate {
    states: Mutex<Vec<SessionState>>,
    degraded: Mutex<Vec<TrackKind>>,
    errors: Mutex<Vec<ReplayError>>,
    clips: AtomicUsize,
}

impl ReplayDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: &SessionState) {
        self.states.lock().push(state.clone());
    }

    fn on_track_degraded(&self, track: TrackKind) {
        self.degraded.lock().push(track);
    }

    fn on_error(&self, error: &ReplayError) {
        self.errors.lock().push(error.clone());
    }

    fn on_clip_ready(&self, _clip: &MaterializedClip) {
        self.clips.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    controller: CaptureController,
    slot: Arc<SourceSlot>,
    delegate: Arc<RecordingDelegate>,
    encoder_closes: Arc<AtomicUsize>,
}

struct LiveSource {
    video: Option<FrameSender>,
    audio: Option<FrameSender>,
    released: Arc<AtomicBool>,
}

fn config() -> ReplayConfiguration {
    ReplayConfiguration {
        video_codecs: vec![VideoCodec::H264, VideoCodec::Vp8],
        audio_codecs: vec![AudioCodec::Opus, AudioCodec::Pcm],
        poll_interval_ms: 5,
        frame_grace_period_ms: 5_000,
        ..Default::default()
    }
}

fn harness_with(config: ReplayConfiguration, registry: EncoderRegistry, closes: Arc<AtomicUsize>) -> Harness {
    let slot = Arc::new(SourceSlot::new());
    let controller = CaptureController::new(config, slot.clone(), registry, Arc::new(ManualClock::new(0))).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());
    Harness {
        controller,
        slot,
        delegate,
        encoder_closes: closes,
    }
}

fn harness() -> Harness {
    let factory = ScriptedVideoFactory::default();
    let closes = Arc::clone(&factory.closes);
    let mut registry = EncoderRegistry::with_defaults();
    registry.register(Arc::new(factory));
    harness_with(config(), registry, closes)
}

fn offer_source(h: &Harness, video: bool, audio: bool) -> LiveSource {
    offer_to(&h.slot, video, audio)
}

fn offer_to(slot: &SourceSlot, video: bool, audio: bool) -> LiveSource {
    let (video_tx, video_rx) = if video {
        let (tx, rx) = frame_channel(
            TrackSettings::Video {
                width: 2,
                height: 2,
                frame_rate: Some(10.0),
            },
            1024,
        );
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let (audio_tx, audio_rx) = if audio {
        let (tx, rx) = frame_channel(
            TrackSettings::Audio {
                sample_rate: 1000,
                channels: 1,
            },
            1024,
        );
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let source = ChannelMediaSource::new(video_rx, audio_rx).with_label("test source");
    let released = source.released_flag();
    slot.offer(Box::new(source));
    LiveSource {
        video: video_tx,
        audio: audio_tx,
        released,
    }
}

fn video_frame(index: u64) -> RawFrame {
    RawFrame::video(2, 2, index * FRAME_US, FRAME_US, vec![(index % 256) as u8; 16])
}

fn audio_frame(index: u64) -> RawFrame {
    // 100 samples at 1kHz = one 100ms chunk.
    RawFrame::audio(1000, 1, index * FRAME_US, &[0.5; 100])
}

fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

fn push_video(h: &Harness, source: &LiveSource, frames: std::ops::Range<u64>) {
    let tx = source.video.as_ref().unwrap();
    let expected = h.controller.diagnostics().video.frames_read + (frames.end - frames.start);
    for i in frames {
        assert!(tx.push(video_frame(i)));
    }
    wait_until(|| h.controller.diagnostics().video.frames_read >= expected);
}

#[test]
fn scenario_a_trim_waits_for_a_sync_point_past_the_cutoff() {
    let mut buffer = RetentionBuffer::new(TrackKind::Video, Duration::from_secs(30));
    for i in 0..40u64 {
        buffer
            .append(EncodedChunk::video(vec![i as u8], i * 1_000_000, 1_000_000, i == 0 || i == 20))
            .unwrap();
    }
    // Cutoff is 9s: no sync point other than index 0 lies before it.
    assert_eq!(buffer.first_sequence(), 0);
    assert!(buffer.snapshot().chunks()[0].is_sync_point);

    for i in 40..52u64 {
        buffer
            .append(EncodedChunk::video(vec![i as u8], i * 1_000_000, 1_000_000, false))
            .unwrap();
    }
    // Cutoff 21s has passed the sync point at 20s.
    assert_eq!(buffer.first_sequence(), 20);
    assert!(buffer.snapshot().chunks()[0].is_sync_point);
}

#[test]
fn retained_span_stays_within_window_plus_sync_spacing() {
    for spacing in 1..=5u64 {
        let window_secs = 10;
        let mut buffer = RetentionBuffer::new(TrackKind::Video, Duration::from_secs(window_secs));
        for i in 0..120u64 {
            let chunk = EncodedChunk::video(vec![0], i * 500_000, 500_000, i % (spacing * 2) == 0);
            buffer.append(chunk).unwrap();
            let snapshot = buffer.snapshot();
            assert!(snapshot.chunks()[0].is_sync_point);
            assert!(buffer.span_us() <= window_secs * 1_000_000 + spacing * 1_000_000);
        }
    }
}

#[test]
fn scenario_b_paused_frames_never_reach_the_clip() {
    let h = harness();
    let source = offer_source(&h, true, false);
    assert_eq!(h.controller.start(), Ok(StartOutcome::Started));

    push_video(&h, &source, 0..10);
    wait_until(|| h.controller.diagnostics().video.chunks_appended == 10);
    h.controller.pause();
    assert_eq!(h.controller.state(), SessionState::Paused);
    push_video(&h, &source, 10..16);
    wait_until(|| h.controller.diagnostics().video.frames_dropped_paused == 6);
    h.controller.resume();
    push_video(&h, &source, 16..20);
    wait_until(|| h.controller.diagnostics().video.chunks_appended == 14);

    let clip = h.controller.materialize().unwrap();
    let parsed = demux(&clip.data).unwrap();
    let indices: Vec<u8> = parsed.blocks_for(1).map(|b| b.payload[0]).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 16, 17, 18, 19]);

    let times: Vec<u64> = parsed.blocks_for(1).map(|b| b.timestamp_ms).collect();
    assert_eq!(times[9], 900);
    assert_eq!(times[10], 1600);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    // Resuming forces a fresh sync point.
    assert!(parsed.blocks_for(1).nth(10).unwrap().keyframe);
}

#[test]
fn scenario_c_audio_ends_early_and_video_continues() {
    let h = harness();
    let mut source = offer_source(&h, true, true);
    h.controller.start().unwrap();

    let video = source.video.take().unwrap();
    let audio = source.audio.take().unwrap();
    for i in 0..250u64 {
        assert!(video.push(video_frame(i)));
        assert!(audio.push(audio_frame(i)));
        if i % 50 == 49 {
            wait_until(|| h.controller.diagnostics().video.frames_read == i + 1);
        }
    }
    wait_until(|| h.controller.diagnostics().audio.chunks_appended == 250);
    audio.end();
    wait_until(|| h.delegate.degraded.lock().contains(&TrackKind::Audio));
    assert!(h.controller.state().is_running());

    for i in 250..400u64 {
        assert!(video.push(video_frame(i)));
        if i % 50 == 49 {
            wait_until(|| h.controller.diagnostics().video.frames_read == i + 1);
        }
    }
    wait_until(|| h.controller.diagnostics().video.chunks_appended == 400);

    let clip = h.controller.materialize().unwrap();
    // Newest video 39.9s, cutoff 9.9s, last sync point before it at 8s.
    assert_eq!(clip.window_start_us, 8_000_000);
    assert_eq!(clip.window_end_us, 39_900_000);

    let parsed = demux(&clip.data).unwrap();
    assert_eq!(parsed.blocks_for(1).count(), 320);
    assert_eq!(parsed.blocks_for(1).last().unwrap().timestamp_ms, 31_900);
    let audio_blocks: Vec<u64> = parsed.blocks_for(2).map(|b| b.timestamp_ms).collect();
    assert_eq!(audio_blocks.len(), 170);
    assert_eq!(audio_blocks.first(), Some(&0));
    assert_eq!(audio_blocks.last(), Some(&16_900));
    assert!(h.delegate.errors.lock().contains(&ReplayError::TrackDegraded(TrackKind::Audio)));
}

#[test]
fn scenario_d_materialize_during_capture_sees_whole_chunks() {
    let h = harness();
    let mut source = offer_source(&h, true, true);
    h.controller.start().unwrap();
    let video = source.video.take().unwrap();
    let audio = source.audio.take().unwrap();

    for i in 0..5u64 {
        assert!(video.push(video_frame(i)));
        assert!(audio.push(audio_frame(i)));
    }
    wait_until(|| h.controller.diagnostics().video.chunks_appended == 5);

    let stop = Arc::new(AtomicBool::new(false));
    let feeder = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut i = 5u64;
            while !stop.load(Ordering::SeqCst) && i < 600 {
                video.push(video_frame(i));
                audio.push(audio_frame(i));
                i += 1;
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let first = h.controller.materialize().unwrap();
    thread::sleep(Duration::from_millis(20));
    let second = h.controller.materialize().unwrap();
    stop.store(true, Ordering::SeqCst);
    feeder.join().unwrap();

    for clip in [&first, &second] {
        let parsed = demux(&clip.data).unwrap();
        let first_video = parsed.blocks_for(1).next().unwrap();
        assert!(first_video.keyframe);
        assert_eq!(first_video.timestamp_ms, 0);
        for block in parsed.blocks_for(1) {
            assert_eq!(block.payload.len(), VIDEO_PAYLOAD_LEN);
            assert!(block.payload.iter().all(|b| *b == block.payload[0]));
        }
        assert_eq!(clip.metadata.size_bytes, clip.data.len());
    }
    assert!(second.window_end_us >= first.window_end_us);
    assert_ne!(first.metadata.id, second.metadata.id);
    assert_eq!(h.delegate.clips.load(Ordering::SeqCst), 2);
}

#[test]
fn stop_twice_releases_everything_once() {
    let h = harness();
    let source = offer_source(&h, true, true);
    h.controller.start().unwrap();
    push_video(&h, &source, 0..3);

    h.controller.stop();
    h.controller.stop();

    assert_eq!(h.controller.state(), SessionState::Stopped { reason: None });
    assert!(source.released.load(Ordering::SeqCst));
    assert_eq!(h.encoder_closes.load(Ordering::SeqCst), 1);
    assert!(source.video.as_ref().unwrap().is_disconnected());
    assert_eq!(h.controller.materialize().err(), Some(ReplayError::NoSyncPoint));

    let stopped = h
        .delegate
        .states
        .lock()
        .iter()
        .filter(|s| matches!(s, SessionState::Stopped { .. }))
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn second_start_reports_already_active() {
    let h = harness();
    let _source = offer_source(&h, true, false);
    assert_eq!(h.controller.start(), Ok(StartOutcome::Started));
    assert_eq!(h.controller.start(), Ok(StartOutcome::AlreadyActive));
    h.controller.pause();
    assert_eq!(h.controller.start(), Ok(StartOutcome::AlreadyActive));
    h.controller.stop();

    // A fresh source can be captured after a full teardown.
    let _next = offer_source(&h, true, false);
    assert_eq!(h.controller.start(), Ok(StartOutcome::Started));
    assert!(h.controller.state().is_running());
}

#[test]
fn missing_source_returns_to_idle() {
    let h = harness();
    assert_eq!(h.controller.start(), Err(ReplayError::NoSource));
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(
        *h.delegate.states.lock(),
        vec![SessionState::Acquiring, SessionState::Idle]
    );
    assert_eq!(*h.delegate.errors.lock(), vec![ReplayError::NoSource]);
}

#[test]
fn no_supported_video_codec_returns_to_idle() {
    let h = harness_with(config(), EncoderRegistry::with_defaults(), Arc::new(AtomicUsize::new(0)));
    let source = offer_source(&h, true, false);
    assert_eq!(h.controller.start(), Err(ReplayError::NoCodecAvailable(TrackKind::Video)));
    assert!(h.controller.state().is_idle());
    assert!(source.released.load(Ordering::SeqCst));
}

#[test]
fn unsupported_video_degrades_to_audio_only() {
    let h = harness_with(config(), EncoderRegistry::with_defaults(), Arc::new(AtomicUsize::new(0)));
    let source = offer_source(&h, true, true);
    assert_eq!(h.controller.start(), Ok(StartOutcome::Started));
    assert_eq!(*h.delegate.degraded.lock(), vec![TrackKind::Video]);

    let audio = source.audio.as_ref().unwrap();
    for i in 0..5 {
        assert!(audio.push(audio_frame(i)));
    }
    wait_until(|| h.controller.diagnostics().audio.chunks_appended == 5);
    let clip = h.controller.materialize().unwrap();
    assert_eq!(clip.mime_type, "audio/x-matroska");
    assert_eq!(clip.duration_us, 500_000);
}

#[test]
fn losing_every_track_stops_the_session() {
    let h = harness();
    let mut source = offer_source(&h, true, true);
    h.controller.start().unwrap();

    drop(source.video.take());
    drop(source.audio.take());
    wait_until(|| matches!(h.controller.state(), SessionState::Stopped { .. }));
    assert_eq!(
        h.controller.state(),
        SessionState::Stopped {
            reason: Some(ReplayError::NoSource)
        }
    );
    wait_until(|| source.released.load(Ordering::SeqCst));
    assert_eq!(h.controller.start(), Err(ReplayError::NoSource));
}

#[test]
fn pause_is_ignored_when_overlay_pause_is_disabled() {
    let factory = ScriptedVideoFactory::default();
    let closes = Arc::clone(&factory.closes);
    let mut registry = EncoderRegistry::with_defaults();
    registry.register(Arc::new(factory));
    let h = harness_with(
        ReplayConfiguration {
            honor_overlay_pause: false,
            ..config()
        },
        registry,
        closes,
    );
    let source = offer_source(&h, true, false);
    h.controller.start().unwrap();
    h.controller.pause();
    assert!(h.controller.state().is_running());
    push_video(&h, &source, 0..3);
    assert_eq!(h.controller.diagnostics().video.frames_dropped_paused, 0);
}

#[test]
fn materialize_before_any_frame_has_no_sync_point() {
    let h = harness();
    let _source = offer_source(&h, true, false);
    h.controller.start().unwrap();
    let err = h.controller.materialize().unwrap_err();
    assert_eq!(err, ReplayError::NoSyncPoint);
    assert_eq!(err.user_message(), "No replay available yet");
    assert_eq!(h.controller.diagnostics().materialize_failures, 1);
}

#[test]
fn out_of_order_output_tears_the_session_down() {
    let factory = RewindingFactory::default();
    let closes = Arc::clone(&factory.closes);
    let mut registry = EncoderRegistry::with_defaults();
    registry.register(Arc::new(factory));
    let h = harness_with(config(), registry, closes);
    let source = offer_source(&h, true, false);
    assert_eq!(h.controller.start(), Ok(StartOutcome::Started));

    let tx = source.video.as_ref().unwrap();
    for i in 0..3 {
        assert!(tx.push(video_frame(i)));
    }
    wait_until(|| matches!(h.controller.state(), SessionState::Stopped { .. }));
    let expected = SessionState::Stopped {
        reason: Some(ReplayError::OutOfOrderChunk {
            track: TrackKind::Video,
            previous_us: FRAME_US,
            received_us: 0,
        }),
    };
    assert_eq!(h.controller.state(), expected);
    assert!(source.released.load(Ordering::SeqCst));
    assert_eq!(h.encoder_closes.load(Ordering::SeqCst), 1);
    assert!(h
        .delegate
        .errors
        .lock()
        .iter()
        .any(|e| matches!(e, ReplayError::OutOfOrderChunk { .. })));

    h.controller.stop();
    h.controller.stop();
    assert_eq!(h.controller.state(), expected);
    assert_eq!(h.encoder_closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.materialize().unwrap_err(), ReplayError::NoSyncPoint);
}

#[test]
fn stop_while_acquiring_tears_down_before_running() {
    let factory = ScriptedVideoFactory::default();
    let closes = Arc::clone(&factory.closes);
    let mut registry = EncoderRegistry::with_defaults();
    registry.register(Arc::new(factory));

    let slot = Arc::new(SourceSlot::new());
    let provider = Arc::new(StopDuringAcquire {
        slot: Arc::clone(&slot),
        controller: Mutex::new(Weak::new()),
    });
    let controller = Arc::new(
        CaptureController::new(config(), provider.clone(), registry, Arc::new(ManualClock::new(0))).unwrap(),
    );
    *provider.controller.lock() = Arc::downgrade(&controller);
    let delegate = Arc::new(RecordingDelegate::default());
    controller.set_delegate(delegate.clone());
    let source = offer_to(&slot, true, false);

    assert!(matches!(controller.start(), Err(ReplayError::InvalidState(_))));
    assert_eq!(controller.state(), SessionState::Stopped { reason: None });
    assert!(source.released.load(Ordering::SeqCst));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(!delegate.states.lock().contains(&SessionState::Running));
    assert_eq!(
        delegate.states.lock().last(),
        Some(&SessionState::Stopped { reason: None })
    );
}
