//! H.264 bitstream helpers.
//!
//! Native encoders usually emit Annex-B byte streams (start-code delimited
//! NAL units), while Matroska stores AVC as length-prefixed NAL units with an
//! `avcC` record as codec-private data. These helpers bridge the two.

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// NAL unit type from the first header byte.
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// Split an Annex-B byte stream into NAL units (start codes removed).
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map(|&(code, _)| code).unwrap_or(data.len());
        // A four-byte start code leaves a zero byte before the next three-byte code.
        while end > payload_start && data[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        if end > payload_start {
            nals.push(&data[payload_start..end]);
        }
    }
    nals
}

pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Whether an Annex-B access unit contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    split_annex_b(data)
        .iter()
        .any(|nal| nal_type(nal) == Some(NAL_IDR))
}

/// First SPS and PPS found in an Annex-B access unit.
pub fn extract_parameter_sets(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let nals = split_annex_b(data);
    let sps = nals.iter().find(|n| nal_type(n) == Some(NAL_SPS))?;
    let pps = nals.iter().find(|n| nal_type(n) == Some(NAL_PPS))?;
    Some((sps.to_vec(), pps.to_vec()))
}

/// Build an `AVCDecoderConfigurationRecord` (ISO/IEC 14496-15) from one SPS and PPS.
pub fn avc_decoder_configuration(sps: &[u8], pps: &[u8]) -> Option<Vec<u8>> {
    if sps.len() < 4 || pps.is_empty() || sps.len() > u16::MAX as usize || pps.len() > u16::MAX as usize {
        return None;
    }
    let mut record = Vec::with_capacity(11 + sps.len() + pps.len());
    record.push(1); // configurationVersion
    record.push(sps[1]); // AVCProfileIndication
    record.push(sps[2]); // profile_compatibility
    record.push(sps[3]); // AVCLevelIndication
    record.push(0xFF); // 4-byte NAL length prefixes
    record.push(0xE1); // one SPS
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1); // one PPS
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);
    Some(record)
}

/// Convert an Annex-B access unit to 4-byte length-prefixed NAL units.
///
/// Access unit delimiters are dropped; parameter sets stay in-band.
pub fn annex_b_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    for nal in split_annex_b(data) {
        if nal_type(nal) == Some(NAL_AUD) {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}
