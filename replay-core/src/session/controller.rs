use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::container::matroska::MatroskaMuxer;
use crate::models::chunk::TrackKind;
use crate::models::clip::MaterializedClip;
use crate::models::config::ReplayConfiguration;
use crate::models::diagnostics::SessionDiagnostics;
use crate::models::error::ReplayError;
use crate::models::state::{SessionState, StartOutcome};
use crate::processing::clock::Clock;
use crate::processing::negotiation::EncoderRegistry;
use crate::session::materializer::ClipMaterializer;
use crate::session::pipeline::{CapturePipeline, PipelineObserver, TrackEnd};
use crate::traits::container_muxer::ContainerMuxer;
use crate::traits::media_source::{MediaSource, SourceProvider};
use crate::traits::replay_delegate::ReplayDelegate;

/// Mutable session state, protected by `parking_lot::Mutex`.
struct ControllerInner {
    state: SessionState,
    /// Incremented per start so late events from a torn-down pipeline are ignored.
    generation: u64,
    source: Option<Box<dyn MediaSource>>,
    pipeline: Option<CapturePipeline>,
    /// Teardown in progress; the session still counts as active.
    stopping: bool,
    /// A stop arrived while acquiring; applied once acquisition finishes.
    stop_requested: bool,
    stop_reason: Option<ReplayError>,
    diagnostics: SessionDiagnostics,
}

impl ControllerInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            source: None,
            pipeline: None,
            stopping: false,
            stop_requested: false,
            stop_reason: None,
            diagnostics: SessionDiagnostics::default(),
        }
    }
}

struct ControllerShared {
    config: ReplayConfiguration,
    inner: Mutex<ControllerInner>,
    delegate: RwLock<Option<Arc<dyn ReplayDelegate>>>,
}

impl ControllerShared {
    fn notify(&self, f: impl FnOnce(&dyn ReplayDelegate)) {
        let delegate = self.delegate.read().clone();
        if let Some(delegate) = delegate {
            f(delegate.as_ref());
        }
    }

    fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state.clone();
        self.announce(&state);
    }

    /// Log and report a state already stored under the lock.
    fn announce(&self, state: &SessionState) {
        log::info!("replay session {}", state.name());
        self.notify(|d| d.on_state_changed(state));
    }

    /// Tear down the live session, if any. `generation` limits the stop to one
    /// specific session; `None` stops whatever is live.
    fn shutdown(&self, generation: Option<u64>, reason: Option<ReplayError>) {
        let (pipeline, source) = {
            let mut inner = self.inner.lock();
            if generation.is_some_and(|g| g != inner.generation) {
                return;
            }
            if matches!(inner.state, SessionState::Acquiring) {
                inner.stop_requested = true;
                if inner.stop_reason.is_none() {
                    inner.stop_reason = reason;
                }
                return;
            }
            if !inner.state.is_live() || inner.stopping {
                return;
            }
            inner.stopping = true;
            (inner.pipeline.take(), inner.source.take())
        };
        self.teardown(pipeline, source, reason);
    }

    /// Stop workers, clear retention, release the source, then report `Stopped`.
    fn teardown(
        &self,
        pipeline: Option<CapturePipeline>,
        source: Option<Box<dyn MediaSource>>,
        reason: Option<ReplayError>,
    ) {
        if let Some(mut pipeline) = pipeline {
            pipeline.stop();
            let video = pipeline.diagnostics(TrackKind::Video);
            let audio = pipeline.diagnostics(TrackKind::Audio);
            pipeline.clear_buffers();
            let mut inner = self.inner.lock();
            inner.diagnostics.video = video;
            inner.diagnostics.audio = audio;
        }
        if let Some(mut source) = source {
            source.release();
        }

        let stopped = SessionState::Stopped { reason: reason.clone() };
        {
            let mut inner = self.inner.lock();
            inner.stopping = false;
            inner.stop_requested = false;
            inner.stop_reason = None;
            inner.state = stopped.clone();
        }
        if let Some(e) = &reason {
            log::warn!("replay session stopped: {}", e);
        }
        self.announce(&stopped);
        if let Some(e) = reason {
            self.notify(|d| d.on_error(&e));
        }
    }
}

/// Routes pipeline events for one session generation back to the controller.
struct SessionObserver {
    shared: Weak<ControllerShared>,
    generation: u64,
}

impl PipelineObserver for SessionObserver {
    fn on_track_ended(&self, track: TrackKind, end: &TrackEnd, remaining: usize) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if remaining > 0 {
            if shared.inner.lock().generation != self.generation {
                return;
            }
            log::warn!("{} track degraded, capture continues", track);
            shared.notify(|d| {
                d.on_track_degraded(track);
                d.on_error(&ReplayError::TrackDegraded(track));
            });
            return;
        }
        let reason = match end {
            TrackEnd::Failed(e) => e.clone(),
            _ => ReplayError::NoSource,
        };
        shared.shutdown(Some(self.generation), Some(reason));
    }

    fn on_fatal(&self, error: &ReplayError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.shutdown(Some(self.generation), Some(error.clone()));
        }
    }
}

/// Single entry point for a replay capture session.
///
/// Owns at most one live session at a time:
/// ```text
/// [SourceProvider] → [MediaSource] → [CapturePipeline] → [RetentionBuffer] × 2
///                                                              ↓ snapshot
///                                         materialize() → [ClipMaterializer] → MaterializedClip
/// ```
/// A start request while a session is acquiring or live is a no-op that
/// reports `AlreadyActive`. `stop` may be called at any time and any number
/// of times.
pub struct CaptureController {
    shared: Arc<ControllerShared>,
    provider: Arc<dyn SourceProvider>,
    registry: EncoderRegistry,
    clock: Arc<dyn Clock>,
}

impl CaptureController {
    pub fn new(
        config: ReplayConfiguration,
        provider: Arc<dyn SourceProvider>,
        registry: EncoderRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ReplayError> {
        config.validate().map_err(ReplayError::ConfigurationFailed)?;
        Ok(Self {
            shared: Arc::new(ControllerShared {
                config,
                inner: Mutex::new(ControllerInner::new()),
                delegate: RwLock::new(None),
            }),
            provider,
            registry,
            clock,
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn ReplayDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn config(&self) -> &ReplayConfiguration {
        &self.shared.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state.clone()
    }

    /// Acquire the live source and start capture.
    ///
    /// Transitions: idle/stopped → acquiring → running. On `NoSource` or
    /// `NoCodecAvailable` the session returns to idle and the error is returned.
    pub fn start(&self) -> Result<StartOutcome, ReplayError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_active() || inner.stopping {
                log::debug!("start ignored, session is {}", inner.state.name());
                return Ok(StartOutcome::AlreadyActive);
            }
            inner.generation += 1;
            inner.stop_requested = false;
            inner.stop_reason = None;
            inner.diagnostics.video = Default::default();
            inner.diagnostics.audio = Default::default();
            inner.state = SessionState::Acquiring;
            inner.generation
        };
        self.shared.announce(&SessionState::Acquiring);

        let mut source = match self.provider.acquire() {
            Ok(source) => source,
            Err(e) => return Err(self.fail_start(e)),
        };
        log::info!("acquired {}", source.describe());

        let config = &self.shared.config;
        let video = if config.enable_video { source.take_video() } else { None };
        let audio = if config.enable_audio { source.take_audio() } else { None };

        let observer = Arc::new(SessionObserver {
            shared: Arc::downgrade(&self.shared),
            generation,
        });
        let pipeline = match CapturePipeline::start(
            config,
            &self.registry,
            Arc::clone(&self.clock),
            video,
            audio,
            observer,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                source.release();
                return Err(self.fail_start(e));
            }
        };
        let degraded = pipeline.degraded_at_start().to_vec();

        {
            let mut inner = self.shared.inner.lock();
            if inner.stop_requested {
                let reason = inner.stop_reason.take();
                inner.stopping = true;
                drop(inner);
                log::info!("stop requested during acquisition");
                self.shared.teardown(Some(pipeline), Some(source), reason.clone());
                return Err(reason.unwrap_or_else(|| ReplayError::InvalidState("capture stopped while acquiring".into())));
            }
            inner.pipeline = Some(pipeline);
            inner.source = Some(source);
            inner.state = SessionState::Running;
        }
        self.shared.announce(&SessionState::Running);

        for track in degraded {
            self.shared.notify(|d| {
                d.on_track_degraded(track);
                d.on_error(&ReplayError::TrackDegraded(track));
            });
        }
        Ok(StartOutcome::Started)
    }

    fn fail_start(&self, error: ReplayError) -> ReplayError {
        log::error!("replay session failed to start: {}", error);
        {
            let mut inner = self.shared.inner.lock();
            inner.stop_requested = false;
            inner.stop_reason = None;
        }
        self.shared.set_state(SessionState::Idle);
        self.shared.notify(|d| d.on_error(&error));
        error
    }

    /// Suppress capture while an overlay covers the content. Idempotent.
    ///
    /// Ignored when `honor_overlay_pause` is off or no session is running.
    pub fn pause(&self) {
        if !self.shared.config.honor_overlay_pause {
            log::debug!("pause ignored, overlay pause disabled");
            return;
        }
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_running() || inner.stopping {
                return;
            }
            let Some(pipeline) = inner.pipeline.as_ref() else {
                return;
            };
            pipeline.pause();
            inner.state = SessionState::Paused;
        }
        self.shared.announce(&SessionState::Paused);
    }

    /// Resume capture after `pause`. Idempotent.
    pub fn resume(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_paused() || inner.stopping {
                return;
            }
            let Some(pipeline) = inner.pipeline.as_ref() else {
                return;
            };
            pipeline.resume();
            inner.state = SessionState::Running;
        }
        self.shared.announce(&SessionState::Running);
    }

    /// Tear down the session: close encoders, cancel readers, clear retention,
    /// release the source. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        self.shared.shutdown(None, None);
    }

    /// Produce a clip of the retained window in a Matroska/WebM container.
    pub fn materialize(&self) -> Result<MaterializedClip, ReplayError> {
        self.materialize_with(MatroskaMuxer::new())
    }

    /// Produce a clip with a caller-supplied container muxer.
    ///
    /// Fails with `NoSyncPoint` when no session is live or nothing decodable
    /// has been retained yet.
    pub fn materialize_with<M: ContainerMuxer>(&self, muxer: M) -> Result<MaterializedClip, ReplayError> {
        let snapshots = {
            let inner = self.shared.inner.lock();
            match inner.pipeline.as_ref() {
                Some(pipeline) if inner.state.is_live() => {
                    Some((pipeline.snapshot(TrackKind::Video), pipeline.snapshot(TrackKind::Audio)))
                }
                _ => None,
            }
        };

        let result = match &snapshots {
            Some((video, audio)) => ClipMaterializer::materialize(video.as_ref(), audio.as_ref(), muxer),
            None => Err(ReplayError::NoSyncPoint),
        };

        match &result {
            Ok(clip) => {
                self.shared.inner.lock().diagnostics.clips_produced += 1;
                self.shared.notify(|d| d.on_clip_ready(clip));
            }
            Err(e) => {
                self.shared.inner.lock().diagnostics.materialize_failures += 1;
                log::warn!("materialize failed: {}", e);
            }
        }
        result
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let inner = self.shared.inner.lock();
        let mut diagnostics = inner.diagnostics.clone();
        if let Some(pipeline) = inner.pipeline.as_ref() {
            diagnostics.video = pipeline.diagnostics(TrackKind::Video);
            diagnostics.audio = pipeline.diagnostics(TrackKind::Audio);
        }
        diagnostics
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.shared.shutdown(None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::clock::ManualClock;
    use crate::sources::channel::SourceSlot;

    fn controller(slot: Arc<SourceSlot>) -> CaptureController {
        CaptureController::new(
            ReplayConfiguration::default(),
            slot,
            EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap()
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = ReplayConfiguration {
            retention_window_secs: 0.0,
            ..Default::default()
        };
        let result = CaptureController::new(
            config,
            Arc::new(SourceSlot::new()),
            EncoderRegistry::with_defaults(),
            Arc::new(ManualClock::new(0)),
        );
        assert!(matches!(result, Err(ReplayError::ConfigurationFailed(_))));
    }

    #[test]
    fn start_without_source_returns_to_idle() {
        let controller = controller(Arc::new(SourceSlot::new()));
        assert_eq!(controller.start(), Err(ReplayError::NoSource));
        assert!(controller.state().is_idle());
    }

    #[test]
    fn idle_controls_are_no_ops() {
        let controller = controller(Arc::new(SourceSlot::new()));
        controller.pause();
        controller.resume();
        controller.stop();
        controller.stop();
        assert!(controller.state().is_idle());
        assert_eq!(controller.materialize().err(), Some(ReplayError::NoSyncPoint));
        assert_eq!(controller.diagnostics().materialize_failures, 1);
    }
}
