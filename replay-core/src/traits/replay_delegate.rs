use crate::models::chunk::TrackKind;
use crate::models::clip::MaterializedClip;
use crate::models::error::ReplayError;
use crate::models::state::SessionState;

/// Event delegate for capture session notifications.
///
/// Methods may be called from pipeline worker threads, never while the
/// controller holds its internal lock. Implementations should marshal to the
/// UI thread if needed.
pub trait ReplayDelegate: Send + Sync {
    /// Called when the session state changes.
    fn on_state_changed(&self, state: &SessionState);

    /// Called when one track stops supplying frames while the other continues.
    fn on_track_degraded(&self, track: TrackKind);

    /// Called when an error occurs during capture or materialization.
    fn on_error(&self, error: &ReplayError);

    /// Called when a clip has been materialized and handed to the caller.
    fn on_clip_ready(&self, _clip: &MaterializedClip) {}
}
