//! In-memory Matroska / WebM multiplexer.
//!
//! Layout of a finished clip:
//! ```text
//! [EBML header]                     DocType "webm" or "matroska"
//! [Segment]
//!   [Info]                          TimestampScale = 1ms, Duration
//!   [Tracks]                        one TrackEntry per track, CodecPrivate from decoder config
//!   [Cluster]*                      new cluster at each video keyframe (or every 5s)
//!     [Timestamp] [SimpleBlock]*
//!   [Cues]                          one CuePoint per keyframe-led cluster
//! ```
//! Everything is buffered until `finalize`, so every element size is known and
//! no seeking or size patching is needed.

use bytes::Bytes;

use super::ebml;
use crate::models::chunk::EncodedChunk;
use crate::models::decoder_config::DecoderConfig;
use crate::models::error::ReplayError;
use crate::traits::container_muxer::ContainerMuxer;

pub const ID_EBML: u32 = 0x1A45_DFA3;
pub const ID_EBML_VERSION: u32 = 0x4286;
pub const ID_EBML_READ_VERSION: u32 = 0x42F7;
pub const ID_EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const ID_EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const ID_DOC_TYPE: u32 = 0x4282;
pub const ID_DOC_TYPE_VERSION: u32 = 0x4287;
pub const ID_DOC_TYPE_READ_VERSION: u32 = 0x4285;
pub const ID_SEGMENT: u32 = 0x1853_8067;
pub const ID_INFO: u32 = 0x1549_A966;
pub const ID_TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
pub const ID_MUXING_APP: u32 = 0x4D80;
pub const ID_WRITING_APP: u32 = 0x5741;
pub const ID_DURATION: u32 = 0x4489;
pub const ID_TRACKS: u32 = 0x1654_AE6B;
pub const ID_TRACK_ENTRY: u32 = 0xAE;
pub const ID_TRACK_NUMBER: u32 = 0xD7;
pub const ID_TRACK_UID: u32 = 0x73C5;
pub const ID_TRACK_TYPE: u32 = 0x83;
pub const ID_FLAG_LACING: u32 = 0x9C;
pub const ID_CODEC_ID: u32 = 0x86;
pub const ID_CODEC_PRIVATE: u32 = 0x63A2;
pub const ID_VIDEO: u32 = 0xE0;
pub const ID_PIXEL_WIDTH: u32 = 0xB0;
pub const ID_PIXEL_HEIGHT: u32 = 0xBA;
pub const ID_AUDIO: u32 = 0xE1;
pub const ID_SAMPLING_FREQUENCY: u32 = 0xB5;
pub const ID_CHANNELS: u32 = 0x9F;
pub const ID_BIT_DEPTH: u32 = 0x6264;
pub const ID_CLUSTER: u32 = 0x1F43_B675;
pub const ID_CLUSTER_TIMESTAMP: u32 = 0xE7;
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub const ID_CUES: u32 = 0x1C53_BB6B;
pub const ID_CUE_POINT: u32 = 0xBB;
pub const ID_CUE_TIME: u32 = 0xB3;
pub const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const ID_CUE_TRACK: u32 = 0xF7;
pub const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;

const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;
const TIMESTAMP_SCALE_NS: u64 = 1_000_000;
const MAX_CLUSTER_SPAN_MS: u64 = 5_000;
const KEYFRAME_FLAG: u8 = 0x80;

struct MuxTrack {
    number: u64,
    config: DecoderConfig,
}

struct PendingBlock {
    track_number: u64,
    timestamp_us: u64,
    end_us: u64,
    keyframe: bool,
    payload: Bytes,
}

/// Buffers chunks and writes a complete Matroska (or WebM) file on `finalize`.
pub struct MatroskaMuxer {
    writing_app: String,
    tracks: Vec<MuxTrack>,
    blocks: Vec<PendingBlock>,
}

impl MatroskaMuxer {
    pub fn new() -> Self {
        Self::with_writing_app(concat!("replay-core ", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_writing_app(app: &str) -> Self {
        Self {
            writing_app: app.to_string(),
            tracks: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn is_webm(&self) -> bool {
        self.tracks.iter().all(|t| t.config.is_webm_compatible())
    }

    fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| matches!(t.config, DecoderConfig::Video(_)))
    }

    fn video_track_number(&self) -> Option<u64> {
        self.tracks
            .iter()
            .find(|t| matches!(t.config, DecoderConfig::Video(_)))
            .map(|t| t.number)
    }

    fn write_ebml_header(&self, out: &mut Vec<u8>) {
        let mut header = Vec::new();
        ebml::uint(&mut header, ID_EBML_VERSION, 1);
        ebml::uint(&mut header, ID_EBML_READ_VERSION, 1);
        ebml::uint(&mut header, ID_EBML_MAX_ID_LENGTH, 4);
        ebml::uint(&mut header, ID_EBML_MAX_SIZE_LENGTH, 8);
        ebml::string(&mut header, ID_DOC_TYPE, if self.is_webm() { "webm" } else { "matroska" });
        ebml::uint(&mut header, ID_DOC_TYPE_VERSION, 4);
        ebml::uint(&mut header, ID_DOC_TYPE_READ_VERSION, 2);
        ebml::master(out, ID_EBML, &header);
    }

    fn write_info(&self, out: &mut Vec<u8>, duration_ms: f64) {
        let mut info = Vec::new();
        ebml::uint(&mut info, ID_TIMESTAMP_SCALE, TIMESTAMP_SCALE_NS);
        ebml::string(&mut info, ID_MUXING_APP, &self.writing_app);
        ebml::string(&mut info, ID_WRITING_APP, &self.writing_app);
        ebml::float(&mut info, ID_DURATION, duration_ms);
        ebml::master(out, ID_INFO, &info);
    }

    fn write_tracks(&self, out: &mut Vec<u8>) {
        let mut tracks = Vec::new();
        for track in &self.tracks {
            let mut entry = Vec::new();
            ebml::uint(&mut entry, ID_TRACK_NUMBER, track.number);
            ebml::uint(&mut entry, ID_TRACK_UID, track.number);
            ebml::uint(&mut entry, ID_FLAG_LACING, 0);
            ebml::string(&mut entry, ID_CODEC_ID, track.config.matroska_id());
            if let Some(private) = track.config.description() {
                ebml::binary(&mut entry, ID_CODEC_PRIVATE, private);
            }
            match &track.config {
                DecoderConfig::Video(video) => {
                    ebml::uint(&mut entry, ID_TRACK_TYPE, TRACK_TYPE_VIDEO);
                    let mut settings = Vec::new();
                    ebml::uint(&mut settings, ID_PIXEL_WIDTH, video.width as u64);
                    ebml::uint(&mut settings, ID_PIXEL_HEIGHT, video.height as u64);
                    ebml::master(&mut entry, ID_VIDEO, &settings);
                }
                DecoderConfig::Audio(audio) => {
                    ebml::uint(&mut entry, ID_TRACK_TYPE, TRACK_TYPE_AUDIO);
                    let mut settings = Vec::new();
                    ebml::float(&mut settings, ID_SAMPLING_FREQUENCY, audio.sample_rate as f64);
                    ebml::uint(&mut settings, ID_CHANNELS, audio.channels as u64);
                    if audio.bit_depth > 0 {
                        ebml::uint(&mut settings, ID_BIT_DEPTH, audio.bit_depth as u64);
                    }
                    ebml::master(&mut entry, ID_AUDIO, &settings);
                }
            }
            ebml::master(&mut tracks, ID_TRACK_ENTRY, &entry);
        }
        ebml::master(out, ID_TRACKS, &tracks);
    }

    /// Serialize clusters; returns the bytes and `(time_ms, offset, track)` cue candidates,
    /// with offsets relative to the start of the cluster area.
    fn write_clusters(&self) -> Result<(Vec<u8>, Vec<(u64, usize, u64)>), ReplayError> {
        let video_track = self.video_track_number();
        let mut out = Vec::new();
        let mut cues = Vec::new();
        let mut cluster: Vec<u8> = Vec::new();
        let mut cluster_start_ms: Option<u64> = None;

        for block in &self.blocks {
            let block_ms = block.timestamp_us / 1000;
            let starts_gop = block.keyframe && Some(block.track_number) == video_track;
            let needs_new = match cluster_start_ms {
                None => true,
                Some(start) => starts_gop || block_ms - start > MAX_CLUSTER_SPAN_MS,
            };
            if needs_new {
                if cluster_start_ms.is_some() {
                    ebml::master(&mut out, ID_CLUSTER, &cluster);
                    cluster.clear();
                }
                if starts_gop || video_track.is_none() {
                    cues.push((block_ms, out.len(), block.track_number));
                }
                ebml::uint(&mut cluster, ID_CLUSTER_TIMESTAMP, block_ms);
                cluster_start_ms = Some(block_ms);
            }

            let relative = block_ms - cluster_start_ms.unwrap_or(block_ms);
            let relative = i16::try_from(relative)
                .map_err(|_| ReplayError::MuxingFailed(format!("block offset {}ms exceeds cluster range", relative)))?;

            let track = ebml::track_vint(block.track_number);
            let mut simple_block = Vec::with_capacity(track.len() + 3 + block.payload.len());
            simple_block.extend_from_slice(&track);
            simple_block.extend_from_slice(&relative.to_be_bytes());
            simple_block.push(if block.keyframe { KEYFRAME_FLAG } else { 0 });
            simple_block.extend_from_slice(&block.payload);
            ebml::binary(&mut cluster, ID_SIMPLE_BLOCK, &simple_block);
        }
        if cluster_start_ms.is_some() {
            ebml::master(&mut out, ID_CLUSTER, &cluster);
        }
        Ok((out, cues))
    }

    fn write_cues(out: &mut Vec<u8>, cues: &[(u64, usize, u64)], cluster_base: usize) {
        let mut points = Vec::new();
        for &(time_ms, offset, track) in cues {
            let mut positions = Vec::new();
            ebml::uint(&mut positions, ID_CUE_TRACK, track);
            ebml::uint(&mut positions, ID_CUE_CLUSTER_POSITION, (cluster_base + offset) as u64);
            let mut point = Vec::new();
            ebml::uint(&mut point, ID_CUE_TIME, time_ms);
            ebml::master(&mut point, ID_CUE_TRACK_POSITIONS, &positions);
            ebml::master(&mut points, ID_CUE_POINT, &point);
        }
        ebml::master(out, ID_CUES, &points);
    }
}

impl Default for MatroskaMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerMuxer for MatroskaMuxer {
    fn mime_type(&self) -> &'static str {
        match (self.has_video(), self.is_webm()) {
            (true, true) => "video/webm",
            (true, false) => "video/x-matroska",
            (false, true) => "audio/webm",
            (false, false) => "audio/x-matroska",
        }
    }

    fn add_track(&mut self, config: &DecoderConfig) -> Result<u64, ReplayError> {
        if self.tracks.iter().any(|t| t.config.track() == config.track()) {
            return Err(ReplayError::MuxingFailed(format!("duplicate {} track", config.track())));
        }
        let number = self.tracks.len() as u64 + 1;
        self.tracks.push(MuxTrack {
            number,
            config: config.clone(),
        });
        Ok(number)
    }

    fn write_chunk(&mut self, track_number: u64, timestamp_us: u64, chunk: &EncodedChunk) -> Result<(), ReplayError> {
        if !self.tracks.iter().any(|t| t.number == track_number) {
            return Err(ReplayError::MuxingFailed(format!("unknown track {}", track_number)));
        }
        if let Some(last) = self.blocks.last() {
            if timestamp_us < last.timestamp_us {
                return Err(ReplayError::MuxingFailed(format!(
                    "chunk at {}us written after {}us",
                    timestamp_us, last.timestamp_us
                )));
            }
        }
        self.blocks.push(PendingBlock {
            track_number,
            timestamp_us,
            end_us: timestamp_us + chunk.duration_us,
            keyframe: chunk.is_sync_point,
            payload: chunk.payload.clone(),
        });
        Ok(())
    }

    fn finalize(self) -> Result<Bytes, ReplayError> {
        if self.tracks.is_empty() {
            return Err(ReplayError::MuxingFailed("no tracks declared".into()));
        }
        if self.blocks.is_empty() {
            return Err(ReplayError::MuxingFailed("no media to write".into()));
        }

        let duration_us = self.blocks.iter().map(|b| b.end_us).max().unwrap_or(0);
        let (clusters, cues) = self.write_clusters()?;

        let mut segment = Vec::with_capacity(clusters.len() + 1024);
        self.write_info(&mut segment, duration_us as f64 / 1000.0);
        self.write_tracks(&mut segment);
        let cluster_base = segment.len();
        segment.extend_from_slice(&clusters);
        Self::write_cues(&mut segment, &cues, cluster_base);

        let mut out = Vec::with_capacity(segment.len() + 64);
        self.write_ebml_header(&mut out);
        ebml::master(&mut out, ID_SEGMENT, &segment);
        Ok(Bytes::from(out))
    }
}
