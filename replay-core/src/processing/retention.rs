use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::models::chunk::{EncodedChunk, TrackKind};
use crate::models::decoder_config::DecoderConfig;
use crate::models::error::ReplayError;

/// Retention buffer shared between its single writer (the track appender)
/// and any number of snapshot readers.
pub type SharedRetentionBuffer = Arc<RwLock<RetentionBuffer>>;

/// Trailing-window store of encoded chunks for one track.
///
/// Chunks live in an arena addressed by a monotonically increasing sequence
/// number; eviction only ever drops a prefix. For video, the retained range
/// always starts at a sync point once one exists older than the cutoff, so a
/// snapshot is decodable from its first sync point without evicted data.
#[derive(Debug)]
pub struct RetentionBuffer {
    track: TrackKind,
    window_us: u64,
    chunks: VecDeque<Arc<EncodedChunk>>,
    /// Sequence number of `chunks[0]`.
    first_sequence: u64,
    decoder_config: Option<Arc<DecoderConfig>>,
    retained_bytes: usize,
    evicted_total: u64,
}

impl RetentionBuffer {
    pub fn new(track: TrackKind, window: Duration) -> Self {
        Self {
            track,
            window_us: window.as_micros() as u64,
            chunks: VecDeque::new(),
            first_sequence: 0,
            decoder_config: None,
            retained_bytes: 0,
            evicted_total: 0,
        }
    }

    pub fn shared(track: TrackKind, window: Duration) -> SharedRetentionBuffer {
        Arc::new(RwLock::new(Self::new(track, window)))
    }

    /// Record the track's decoder configuration. Populated once; a repeat of
    /// the same configuration is accepted, a different one is rejected.
    pub fn set_decoder_config(&mut self, config: DecoderConfig) -> Result<(), ReplayError> {
        if config.track() != self.track {
            return Err(ReplayError::InvalidState(format!(
                "{} decoder configuration offered to {} buffer",
                config.track(),
                self.track
            )));
        }
        match &self.decoder_config {
            None => {
                self.decoder_config = Some(Arc::new(config));
                Ok(())
            }
            Some(existing) if **existing == config => Ok(()),
            Some(_) => Err(ReplayError::InvalidState(format!(
                "{} decoder configuration changed mid-session",
                self.track
            ))),
        }
    }

    /// Append a chunk at the tail and trim the head to the retention window.
    ///
    /// Returns the number of chunks evicted by the trim.
    pub fn append(&mut self, chunk: EncodedChunk) -> Result<usize, ReplayError> {
        if chunk.track != self.track {
            return Err(ReplayError::InvalidState(format!(
                "{} chunk appended to {} buffer",
                chunk.track, self.track
            )));
        }
        if let Some(newest) = self.chunks.back() {
            if chunk.timestamp_us <= newest.timestamp_us {
                return Err(ReplayError::OutOfOrderChunk {
                    track: self.track,
                    previous_us: newest.timestamp_us,
                    received_us: chunk.timestamp_us,
                });
            }
        }

        self.retained_bytes += chunk.payload.len();
        self.chunks.push_back(Arc::new(chunk));
        Ok(self.trim())
    }

    /// Evict `[0, k)` where `k` is the last cut-eligible chunk older than
    /// `newest - window`. Video only cuts at sync points; any audio chunk is
    /// eligible.
    fn trim(&mut self) -> usize {
        let Some(newest) = self.chunks.back().map(|c| c.timestamp_us) else {
            return 0;
        };
        let Some(cutoff) = newest.checked_sub(self.window_us) else {
            return 0;
        };

        let cut = self
            .chunks
            .iter()
            .take_while(|c| c.timestamp_us < cutoff)
            .enumerate()
            .filter(|(_, c)| self.is_cut_boundary(c))
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);

        for evicted in self.chunks.drain(..cut) {
            self.retained_bytes -= evicted.payload.len();
        }
        self.first_sequence += cut as u64;
        self.evicted_total += cut as u64;
        if cut > 0 {
            log::debug!(
                "{} buffer evicted {} chunks, now starting at {}us",
                self.track,
                cut,
                self.oldest_timestamp_us().unwrap_or(0)
            );
        }
        cut
    }

    fn is_cut_boundary(&self, chunk: &EncodedChunk) -> bool {
        match self.track {
            TrackKind::Video => chunk.is_sync_point,
            TrackKind::Audio => true,
        }
    }

    /// Frozen view of the current contents. Later appends and evictions do not
    /// affect a snapshot that has already been taken.
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            track: self.track,
            first_sequence: self.first_sequence,
            chunks: self.chunks.iter().cloned().collect(),
            decoder_config: self.decoder_config.clone(),
        }
    }

    /// Drop all retained chunks and the decoder configuration.
    pub fn clear(&mut self) {
        self.first_sequence += self.chunks.len() as u64;
        self.chunks.clear();
        self.retained_bytes = 0;
        self.decoder_config = None;
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    pub fn oldest_timestamp_us(&self) -> Option<u64> {
        self.chunks.front().map(|c| c.timestamp_us)
    }

    pub fn newest_timestamp_us(&self) -> Option<u64> {
        self.chunks.back().map(|c| c.timestamp_us)
    }

    /// Newest minus oldest retained timestamp.
    pub fn span_us(&self) -> u64 {
        match (self.oldest_timestamp_us(), self.newest_timestamp_us()) {
            (Some(oldest), Some(newest)) => newest - oldest,
            _ => 0,
        }
    }

    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn decoder_config(&self) -> Option<&DecoderConfig> {
        self.decoder_config.as_deref()
    }
}

/// Immutable, point-in-time view over a retention buffer.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    track: TrackKind,
    first_sequence: u64,
    chunks: Arc<[Arc<EncodedChunk>]>,
    decoder_config: Option<Arc<DecoderConfig>>,
}

impl BufferSnapshot {
    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn chunks(&self) -> &[Arc<EncodedChunk>] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sequence number of the first chunk in the snapshot.
    pub fn first_sequence(&self) -> u64 {
        self.first_sequence
    }

    /// Index of the first independently decodable chunk.
    pub fn first_sync_index(&self) -> Option<usize> {
        self.chunks.iter().position(|c| c.is_sync_point)
    }

    pub fn decoder_config(&self) -> Option<&DecoderConfig> {
        self.decoder_config.as_deref()
    }
}
