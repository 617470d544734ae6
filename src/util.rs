//! Field readers shared by the leaf decoders. Callers check lengths first;
//! these index the buffer directly.

use crate::boxes::{BoxHeader, FourCC, MAX_BOX_SIZE};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use serde::{Serialize, Serializer};

/// Seconds between 1904-01-01 and 1970-01-01 (midnight UTC).
pub const MP4_EPOCH_OFFSET_SECS: i64 = 2_082_844_800;

/// Bytes after the header, as an in-memory length.
pub fn content_len(header: &BoxHeader) -> usize {
    usize::try_from(header.content_length()).unwrap_or(usize::MAX)
}

pub fn read_fourcc(buf: &[u8], offset: usize) -> FourCC {
    FourCC([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Reads a big-endian u64 that must stay within 2^53 - 1.
pub fn read_safe_u64(buf: &[u8], offset: usize, box_type: FourCC) -> Result<u64> {
    let value = BigEndian::read_u64(&buf[offset..offset + 8]);
    if value > MAX_BOX_SIZE {
        return Err(Error::ValueOverflow { box_type, value });
    }
    Ok(value)
}

/// 16.16 fixed point.
pub fn read_fixed16x16(buf: &[u8], offset: usize) -> f64 {
    BigEndian::read_i32(&buf[offset..offset + 4]) as f64 / 65536.0
}

/// 8.8 fixed point.
pub fn read_fixed8x8(buf: &[u8], offset: usize) -> f64 {
    BigEndian::read_i16(&buf[offset..offset + 2]) as f64 / 256.0
}

/// Reads the 3x3 transformation matrix (nine 32-bit values).
///
/// Entries u, v and w are 2.30 fixed point, the others 16.16.
pub fn read_matrix(buf: &[u8], offset: usize) -> [f64; 9] {
    let mut m = [0f64; 9];
    for (i, v) in m.iter_mut().enumerate() {
        let raw = BigEndian::read_i32(&buf[offset + i * 4..offset + i * 4 + 4]) as f64;
        *v = if i % 3 == 2 { raw / (1u64 << 30) as f64 } else { raw / 65536.0 };
    }
    m
}

/// A timestamp in seconds since 1904-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct Mp4Time(pub u64);

impl Mp4Time {
    pub fn unix_seconds(self) -> i64 {
        self.0 as i64 - MP4_EPOCH_OFFSET_SECS
    }
}

pub fn read_time32(buf: &[u8], offset: usize) -> Mp4Time {
    Mp4Time(BigEndian::read_u32(&buf[offset..offset + 4]) as u64)
}

pub fn read_time64(buf: &[u8], offset: usize, box_type: FourCC) -> Result<Mp4Time> {
    read_safe_u64(buf, offset, box_type).map(Mp4Time)
}

/// Reads a NUL-terminated string. Returns the text and the bytes consumed,
/// including the terminator when present.
pub fn read_cstring(buf: &[u8]) -> (String, usize) {
    match buf.iter().position(|&b| b == 0) {
        Some(end) => (String::from_utf8_lossy(&buf[..end]).into_owned(), end + 1),
        None => (String::from_utf8_lossy(buf).into_owned(), buf.len()),
    }
}

pub fn serialize_opt_hex<S: Serializer>(
    v: &Option<[u8; 16]>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match v {
        Some(bytes) => s.serialize_str(&hex::encode(bytes)),
        None => s.serialize_none(),
    }
}

pub fn serialize_hex<S: Serializer>(v: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(v))
}

pub fn serialize_hex_list<S: Serializer>(
    v: &[Vec<u8>],
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(v.iter().map(hex::encode))
}
