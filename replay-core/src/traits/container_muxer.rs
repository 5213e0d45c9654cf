use bytes::Bytes;

use crate::models::chunk::EncodedChunk;
use crate::models::decoder_config::DecoderConfig;
use crate::models::error::ReplayError;

/// Multiplexes per-track chunks into one playable container.
pub trait ContainerMuxer {
    /// MIME type of the finished container.
    fn mime_type(&self) -> &'static str;

    /// Declare a track; returns the track number to pass to `write_chunk`.
    fn add_track(&mut self, config: &DecoderConfig) -> Result<u64, ReplayError>;

    /// Write one chunk at `timestamp_us` on the container's zero-based timeline.
    ///
    /// Chunks must be supplied in non-decreasing timestamp order across all tracks.
    fn write_chunk(&mut self, track_number: u64, timestamp_us: u64, chunk: &EncodedChunk) -> Result<(), ReplayError>;

    /// Produce the finished container.
    fn finalize(self) -> Result<Bytes, ReplayError>;
}
