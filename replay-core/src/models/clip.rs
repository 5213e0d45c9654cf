use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::chunk::TrackKind;

/// Description of one track inside a materialized clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipTrack {
    #[serde(rename = "type")]
    pub kind: TrackKind,
    pub codec: String,
    pub chunk_count: usize,
}

/// A standalone, playable container produced on demand.
///
/// The engine keeps no reference to the clip once it is returned; the caller
/// owns the bytes and decides when to release them.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedClip {
    pub data: Bytes,
    pub mime_type: &'static str,
    /// Absolute session timestamp of the anchoring sync point.
    pub window_start_us: u64,
    /// Absolute session timestamp of the last video (or audio) chunk.
    pub window_end_us: u64,
    pub duration_us: u64,
    /// Whether the clip is guaranteed to start on a sync point.
    pub keyframe_aligned: bool,
    pub metadata: ClipMetadata,
}

impl MaterializedClip {
    pub fn duration_secs(&self) -> f64 {
        self.duration_us as f64 / 1_000_000.0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Serializable summary of a clip, for handing to a playback surface or backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub size_bytes: usize,
    pub checksum: String,
    pub created_at: String,
    pub tracks: Vec<ClipTrack>,
}

impl ClipMetadata {
    pub fn new(duration_secs: f64, size_bytes: usize, checksum: &str, tracks: Vec<ClipTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs,
            size_bytes,
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tracks,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
