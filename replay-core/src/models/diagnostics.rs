/// Counters for one track of a capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackDiagnostics {
    pub frames_read: u64,
    pub frames_dropped_paused: u64,
    pub chunks_appended: u64,
    pub chunks_evicted: u64,
    pub retained_chunks: usize,
    pub retained_bytes: usize,
    pub retained_span_us: u64,
    pub codec: Option<String>,
    pub ended: bool,
}

/// Diagnostics for debugging capture sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDiagnostics {
    pub video: TrackDiagnostics,
    pub audio: TrackDiagnostics,
    pub clips_produced: u64,
    pub materialize_failures: u64,
}
