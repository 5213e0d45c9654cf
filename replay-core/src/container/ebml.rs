//! Minimal EBML element encoder.
//!
//! Every element is `[ID][size vint][payload]`. IDs are written as given (they
//! already carry their length marker); sizes use the shortest vint that does
//! not collide with the reserved all-ones "unknown size" value.

/// Encode an element ID in its minimal byte length.
pub fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
    out.extend_from_slice(&bytes[skip..]);
}

/// Encode a data size as an EBML variable-length integer.
pub fn write_size(out: &mut Vec<u8>, size: u64) {
    let mut length = 1;
    while length < 8 && size >= (1u64 << (7 * length)) - 1 {
        length += 1;
    }
    let marked = size | (1u64 << (7 * length));
    let bytes = marked.to_be_bytes();
    out.extend_from_slice(&bytes[8 - length..]);
}

/// Minimal big-endian bytes of an unsigned integer (at least one byte).
fn uint_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    bytes[skip..].to_vec()
}

pub fn binary(out: &mut Vec<u8>, id: u32, payload: &[u8]) {
    write_id(out, id);
    write_size(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

pub fn uint(out: &mut Vec<u8>, id: u32, value: u64) {
    binary(out, id, &uint_bytes(value));
}

pub fn float(out: &mut Vec<u8>, id: u32, value: f64) {
    binary(out, id, &value.to_be_bytes());
}

pub fn string(out: &mut Vec<u8>, id: u32, value: &str) {
    binary(out, id, value.as_bytes());
}

/// Write a master element whose children were serialized into `children`.
pub fn master(out: &mut Vec<u8>, id: u32, children: &[u8]) {
    binary(out, id, children);
}

/// Encode a track number as the vint used inside SimpleBlock headers.
pub fn track_vint(track_number: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    write_size(&mut out, track_number);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_keep_their_marker_width() {
        let mut out = Vec::new();
        write_id(&mut out, 0x1A45_DFA3);
        write_id(&mut out, 0x4286);
        write_id(&mut out, 0xA3);
        assert_eq!(out, vec![0x1A, 0x45, 0xDF, 0xA3, 0x42, 0x86, 0xA3]);
    }

    #[test]
    fn size_vints() {
        let encode = |size| {
            let mut out = Vec::new();
            write_size(&mut out, size);
            out
        };
        assert_eq!(encode(0), vec![0x80]);
        assert_eq!(encode(1), vec![0x81]);
        assert_eq!(encode(126), vec![0xFE]);
        // 127 would read as "unknown size" in one byte.
        assert_eq!(encode(127), vec![0x40, 0x7F]);
        assert_eq!(encode(16_382), vec![0x7F, 0xFE]);
        assert_eq!(encode(16_383), vec![0x20, 0x3F, 0xFF]);
    }

    #[test]
    fn uint_elements_are_minimal() {
        let mut out = Vec::new();
        uint(&mut out, 0xD7, 1);
        assert_eq!(out, vec![0xD7, 0x81, 0x01]);

        let mut out = Vec::new();
        uint(&mut out, 0x2A_D7B1, 1_000_000);
        assert_eq!(out, vec![0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]);

        let mut out = Vec::new();
        uint(&mut out, 0xE7, 0);
        assert_eq!(out, vec![0xE7, 0x81, 0x00]);
    }

    #[test]
    fn float_elements_use_eight_bytes() {
        let mut out = Vec::new();
        float(&mut out, 0x4489, 1500.0);
        assert_eq!(&out[..3], &[0x44, 0x89, 0x88]);
        assert_eq!(f64::from_be_bytes(out[3..].try_into().unwrap()), 1500.0);
    }

    #[test]
    fn track_vint_for_small_numbers() {
        assert_eq!(track_vint(1), vec![0x81]);
        assert_eq!(track_vint(2), vec![0x82]);
    }
}
