use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::models::chunk::{EncodedChunk, TrackKind};
use crate::models::clip::{ClipMetadata, ClipTrack, MaterializedClip};
use crate::models::decoder_config::DecoderConfig;
use crate::models::error::ReplayError;
use crate::processing::retention::BufferSnapshot;
use crate::traits::container_muxer::ContainerMuxer;

/// Chunks of one track selected for a clip.
struct Selection<'a> {
    kind: TrackKind,
    config: &'a DecoderConfig,
    chunks: &'a [Arc<EncodedChunk>],
}

/// Turns retention snapshots into a standalone clip.
///
/// The extraction window is `[first video sync point, last video chunk]`.
/// Audio is clipped to that window and never extends it. Timestamps are
/// rebased so the clip starts at zero. Only snapshots are read, so a failure
/// here leaves the live buffers untouched.
pub struct ClipMaterializer;

impl ClipMaterializer {
    pub fn materialize<M: ContainerMuxer>(
        video: Option<&BufferSnapshot>,
        audio: Option<&BufferSnapshot>,
        mut muxer: M,
    ) -> Result<MaterializedClip, ReplayError> {
        let (selections, base_us, window_end_us) = Self::select(video, audio)?;

        let mut numbered = Vec::with_capacity(selections.len());
        for selection in &selections {
            let number = muxer.add_track(selection.config)?;
            numbered.push((number, selection.chunks));
        }

        let mut written_end_us = base_us;
        for (track_number, chunk) in merge_by_timestamp(&numbered) {
            muxer.write_chunk(track_number, chunk.timestamp_us - base_us, chunk)?;
            written_end_us = written_end_us.max(chunk.end_us());
        }

        let mime_type = muxer.mime_type();
        let data = muxer.finalize()?;
        let checksum = sha256_hex(&data);
        let duration_us = written_end_us - base_us;

        let tracks = selections
            .iter()
            .map(|s| ClipTrack {
                kind: s.kind,
                codec: s.config.codec_name(),
                chunk_count: s.chunks.len(),
            })
            .collect();
        let metadata = ClipMetadata::new(duration_us as f64 / 1_000_000.0, data.len(), &checksum, tracks);

        log::info!(
            "materialized {:.2}s clip ({} bytes, {})",
            metadata.duration_secs,
            data.len(),
            mime_type
        );

        Ok(MaterializedClip {
            data,
            mime_type,
            window_start_us: base_us,
            window_end_us,
            duration_us,
            keyframe_aligned: true,
            metadata,
        })
    }

    /// Pick the anchoring sync point and the chunks of each track to write.
    fn select<'a>(
        video: Option<&'a BufferSnapshot>,
        audio: Option<&'a BufferSnapshot>,
    ) -> Result<(Vec<Selection<'a>>, u64, u64), ReplayError> {
        let mut selections = Vec::new();

        let (base_us, window_end_us) = match video {
            Some(video) => {
                let anchor = video.first_sync_index().ok_or(ReplayError::NoSyncPoint)?;
                let config = video
                    .decoder_config()
                    .ok_or(ReplayError::MissingDecoderConfig(TrackKind::Video))?;
                let chunks = &video.chunks()[anchor..];
                let base = chunks[0].timestamp_us;
                let end = chunks[chunks.len() - 1].timestamp_us;
                selections.push(Selection {
                    kind: TrackKind::Video,
                    config,
                    chunks,
                });
                (base, end)
            }
            None => {
                // Audio-only session: every audio chunk is a sync point.
                let audio = audio.filter(|a| !a.is_empty()).ok_or(ReplayError::NoSyncPoint)?;
                let chunks = audio.chunks();
                (chunks[0].timestamp_us, chunks[chunks.len() - 1].timestamp_us)
            }
        };

        if let Some(audio) = audio {
            let chunks = audio.chunks();
            let start = chunks.partition_point(|c| c.timestamp_us < base_us);
            let end = chunks.partition_point(|c| c.timestamp_us <= window_end_us);
            if start < end {
                let config = audio
                    .decoder_config()
                    .ok_or(ReplayError::MissingDecoderConfig(TrackKind::Audio))?;
                selections.push(Selection {
                    kind: TrackKind::Audio,
                    config,
                    chunks: &chunks[start..end],
                });
            }
        }

        Ok((selections, base_us, window_end_us))
    }
}

/// Interleave tracks in timestamp order; on ties, earlier tracks go first.
fn merge_by_timestamp<'a>(tracks: &[(u64, &'a [Arc<EncodedChunk>])]) -> Vec<(u64, &'a EncodedChunk)> {
    let total = tracks.iter().map(|(_, chunks)| chunks.len()).sum();
    let mut merged = Vec::with_capacity(total);
    let mut cursors = vec![0usize; tracks.len()];
    loop {
        let next = tracks
            .iter()
            .enumerate()
            .filter_map(|(i, (_, chunks))| chunks.get(cursors[i]).map(|c| (i, c.timestamp_us)))
            .min_by_key(|&(i, ts)| (ts, i));
        let Some((i, _)) = next else {
            break;
        };
        let (number, chunks) = tracks[i];
        merged.push((number, chunks[cursors[i]].as_ref()));
        cursors[i] += 1;
    }
    merged
}

/// SHA-256 hex digest of a finished clip.
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
