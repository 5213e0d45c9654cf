//! Minimal Matroska reader, enough to verify a produced clip: header, tracks,
//! cluster block timestamps and cues. Lacing and unknown-size elements are not
//! supported because the muxer never writes them.

use super::matroska::*;
use crate::models::error::ReplayError;

#[derive(Debug, Clone, PartialEq)]
pub struct DemuxedTrack {
    pub number: u64,
    pub track_type: u64,
    pub codec_id: String,
    pub codec_private: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemuxedBlock {
    pub track_number: u64,
    pub timestamp_ms: u64,
    pub keyframe: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DemuxedClip {
    pub doc_type: String,
    pub timestamp_scale_ns: u64,
    pub duration_ms: f64,
    pub tracks: Vec<DemuxedTrack>,
    pub blocks: Vec<DemuxedBlock>,
    pub cluster_count: usize,
    pub cue_times_ms: Vec<u64>,
}

impl DemuxedClip {
    pub fn blocks_for(&self, track_number: u64) -> impl Iterator<Item = &DemuxedBlock> {
        self.blocks.iter().filter(move |b| b.track_number == track_number)
    }

    pub fn track_of_type(&self, track_type: u64) -> Option<&DemuxedTrack> {
        self.tracks.iter().find(|t| t.track_type == track_type)
    }
}

fn malformed(what: &str) -> ReplayError {
    ReplayError::MuxingFailed(format!("malformed matroska: {}", what))
}

fn vint_length(first: u8) -> Result<usize, ReplayError> {
    if first == 0 {
        return Err(malformed("invalid vint"));
    }
    Ok(first.leading_zeros() as usize + 1)
}

fn read_id(data: &[u8]) -> Result<(u32, usize), ReplayError> {
    let first = *data.first().ok_or_else(|| malformed("truncated id"))?;
    let len = vint_length(first)?;
    if len > 4 || data.len() < len {
        return Err(malformed("bad element id"));
    }
    let id = data[..len].iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
    Ok((id, len))
}

fn read_vint(data: &[u8]) -> Result<(u64, usize), ReplayError> {
    let first = *data.first().ok_or_else(|| malformed("truncated size"))?;
    let len = vint_length(first)?;
    if data.len() < len {
        return Err(malformed("truncated size"));
    }
    let mask = if len >= 8 { 0 } else { 0xFFu8 >> len };
    let value = data[1..len].iter().fold((first & mask) as u64, |acc, b| (acc << 8) | *b as u64);
    let all_ones = (1u64 << (7 * len)) - 1;
    if value == all_ones {
        return Err(malformed("unknown-size element"));
    }
    Ok((value, len))
}

/// Splits a buffer into `(id, payload)` pairs.
fn elements(mut data: &[u8]) -> Result<Vec<(u32, &[u8])>, ReplayError> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let (id, id_len) = read_id(data)?;
        let (size, size_len) = read_vint(&data[id_len..])?;
        let start = id_len + size_len;
        let end = start
            .checked_add(size as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| malformed("element overruns parent"))?;
        out.push((id, &data[start..end]));
        data = &data[end..];
    }
    Ok(out)
}

fn read_uint(payload: &[u8]) -> u64 {
    payload.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

fn read_float(payload: &[u8]) -> Result<f64, ReplayError> {
    match payload.len() {
        4 => Ok(f32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as f64),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(payload);
            Ok(f64::from_be_bytes(raw))
        }
        _ => Err(malformed("float of unexpected width")),
    }
}

fn read_track(payload: &[u8]) -> Result<DemuxedTrack, ReplayError> {
    let mut track = DemuxedTrack {
        number: 0,
        track_type: 0,
        codec_id: String::new(),
        codec_private: None,
    };
    for (id, value) in elements(payload)? {
        match id {
            ID_TRACK_NUMBER => track.number = read_uint(value),
            ID_TRACK_TYPE => track.track_type = read_uint(value),
            ID_CODEC_ID => track.codec_id = String::from_utf8_lossy(value).into_owned(),
            ID_CODEC_PRIVATE => track.codec_private = Some(value.to_vec()),
            _ => {}
        }
    }
    if track.number == 0 {
        return Err(malformed("track entry without number"));
    }
    Ok(track)
}

fn read_cluster(payload: &[u8], clip: &mut DemuxedClip) -> Result<(), ReplayError> {
    let mut cluster_ms: Option<u64> = None;
    for (id, value) in elements(payload)? {
        match id {
            ID_CLUSTER_TIMESTAMP => cluster_ms = Some(read_uint(value)),
            ID_SIMPLE_BLOCK => {
                let base = cluster_ms.ok_or_else(|| malformed("block before cluster timestamp"))?;
                let (track_number, len) = read_vint(value)?;
                if value.len() < len + 3 {
                    return Err(malformed("truncated block header"));
                }
                let relative = i16::from_be_bytes([value[len], value[len + 1]]) as i64;
                let flags = value[len + 2];
                clip.blocks.push(DemuxedBlock {
                    track_number,
                    timestamp_ms: (base as i64 + relative).max(0) as u64,
                    keyframe: flags & 0x80 != 0,
                    payload: value[len + 3..].to_vec(),
                });
            }
            _ => {}
        }
    }
    clip.cluster_count += 1;
    Ok(())
}

/// Parses a clip produced by [`super::matroska::MatroskaMuxer`].
pub fn demux(data: &[u8]) -> Result<DemuxedClip, ReplayError> {
    let top = elements(data)?;
    let mut clip = DemuxedClip::default();

    let (first_id, header) = top.first().ok_or_else(|| malformed("empty file"))?;
    if *first_id != ID_EBML {
        return Err(malformed("missing EBML header"));
    }
    for (id, value) in elements(header)? {
        if id == ID_DOC_TYPE {
            clip.doc_type = String::from_utf8_lossy(value).into_owned();
        }
    }

    let segment = top
        .iter()
        .find(|(id, _)| *id == ID_SEGMENT)
        .map(|(_, payload)| *payload)
        .ok_or_else(|| malformed("missing segment"))?;

    for (id, value) in elements(segment)? {
        match id {
            ID_INFO => {
                for (info_id, info) in elements(value)? {
                    match info_id {
                        ID_TIMESTAMP_SCALE => clip.timestamp_scale_ns = read_uint(info),
                        ID_DURATION => clip.duration_ms = read_float(info)?,
                        _ => {}
                    }
                }
            }
            ID_TRACKS => {
                for (entry_id, entry) in elements(value)? {
                    if entry_id == ID_TRACK_ENTRY {
                        clip.tracks.push(read_track(entry)?);
                    }
                }
            }
            ID_CLUSTER => read_cluster(value, &mut clip)?,
            ID_CUES => {
                for (point_id, point) in elements(value)? {
                    if point_id != ID_CUE_POINT {
                        continue;
                    }
                    for (field, content) in elements(point)? {
                        if field == ID_CUE_TIME {
                            clip.cue_times_ms.push(read_uint(content));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(clip)
}
