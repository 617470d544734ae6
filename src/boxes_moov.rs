//! Movie header boxes: `moov` and the track hierarchy down to `stsd`.

use crate::boxes::{BoxHeader, FourCC, FullBoxHeader, Mp4Box, parse_full_box_header};
use crate::boxes_file::ContainerEncoding;
use crate::boxes_sample_entry::{AVC_SAMPLE_ENTRY_TYPES, AvcSampleEntryEncoding};
use crate::encoding::{
    BoxEncoding, EncodeFields, EncodingNode, Partial, encode_to_of, encoding_length_of,
    need_within, ready,
};
use crate::error::{Error, Result};
use crate::util::{
    Mp4Time, content_len, read_cstring, read_fixed8x8, read_fixed16x16, read_fourcc, read_matrix,
    read_safe_u64, read_time32, read_time64,
};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::Serialize;
use std::io::Write;

pub const MOOV: FourCC = FourCC(*b"moov");
pub const MVHD: FourCC = FourCC(*b"mvhd");
pub const TRAK: FourCC = FourCC(*b"trak");
pub const TKHD: FourCC = FourCC(*b"tkhd");
pub const MDIA: FourCC = FourCC(*b"mdia");
pub const MDHD: FourCC = FourCC(*b"mdhd");
pub const HDLR: FourCC = FourCC(*b"hdlr");
pub const MINF: FourCC = FourCC(*b"minf");
pub const STBL: FourCC = FourCC(*b"stbl");
pub const STSD: FourCC = FourCC(*b"stsd");
pub const MVEX: FourCC = FourCC(*b"mvex");

/// `moov` with the track hierarchy needed to reach the sample descriptions.
pub fn moov_tree() -> Result<EncodingNode> {
    let mut stsd = EncodingNode::new(StsdEncoding);
    for typ in AVC_SAMPLE_ENTRY_TYPES {
        stsd.add_child(AvcSampleEntryEncoding::new(typ))?;
    }
    let stbl = EncodingNode::new(ContainerEncoding::new(STBL)).with_child(stsd)?;
    let minf = EncodingNode::new(ContainerEncoding::new(MINF)).with_child(stbl)?;
    let mdia = EncodingNode::new(ContainerEncoding::new(MDIA))
        .with_child(MdhdEncoding)?
        .with_child(HdlrEncoding)?
        .with_child(minf)?;
    let trak = EncodingNode::new(ContainerEncoding::new(TRAK))
        .with_child(TkhdEncoding)?
        .with_child(mdia)?;
    EncodingNode::new(ContainerEncoding::new(MOOV))
        .with_child(MvhdEncoding)?
        .with_child(trak)?
        .with_child(ContainerEncoding::new(MVEX))
}

/// Times shared by `mvhd`, `tkhd` and `mdhd`, whose width depends on the
/// full-box version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaTimes {
    pub creation_time: Mp4Time,
    pub modification_time: Mp4Time,
    pub duration: u64,
}

fn check_version(box_type: FourCC, full: FullBoxHeader) -> Result<()> {
    if full.version > 1 {
        return Err(Error::UnsupportedVersion { box_type, version: full.version });
    }
    Ok(())
}

// ---------- mvhd ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MvhdBox {
    #[serde(flatten)]
    pub times: MediaTimes,
    pub timescale: u32,
    pub rate: f64,
    pub volume: f64,
    pub matrix: [f64; 9],
    pub next_track_id: u32,
}

pub struct MvhdEncoding;

impl BoxEncoding for MvhdEncoding {
    fn box_type(&self) -> FourCC {
        MVHD
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, o) = ready!(parse_full_box_header(buf), 0);
        check_version(MVHD, full)?;
        let times_len = if full.version == 1 { 28 } else { 16 };
        let used = o + times_len + 80;
        need_within!(buf, used, header);

        let (times, timescale, mut p) = if full.version == 1 {
            let times = MediaTimes {
                creation_time: read_time64(buf, o, MVHD)?,
                modification_time: read_time64(buf, o + 8, MVHD)?,
                duration: read_safe_u64(buf, o + 20, MVHD)?,
            };
            (times, BigEndian::read_u32(&buf[o + 16..]), o + 28)
        } else {
            let times = MediaTimes {
                creation_time: read_time32(buf, o),
                modification_time: read_time32(buf, o + 4),
                duration: BigEndian::read_u32(&buf[o + 12..]) as u64,
            };
            (times, BigEndian::read_u32(&buf[o + 8..]), o + 16)
        };

        let rate = read_fixed16x16(buf, p);
        let volume = read_fixed8x8(buf, p + 4);
        p += 4 + 2 + 10; // rate, volume, reserved
        let matrix = read_matrix(buf, p);
        p += 36 + 24; // matrix, pre_defined
        let next_track_id = BigEndian::read_u32(&buf[p..]);

        let body = MvhdBox { times, timescale, rate, volume, matrix, next_track_id };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }
}

// ---------- tkhd ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TkhdFlags {
    pub enabled: bool,
    pub in_movie: bool,
    pub in_preview: bool,
    pub size_is_aspect_ratio: bool,
}

impl TkhdFlags {
    pub const ENABLED: u32 = 0x000001;
    pub const IN_MOVIE: u32 = 0x000002;
    pub const IN_PREVIEW: u32 = 0x000004;
    pub const SIZE_IS_ASPECT_RATIO: u32 = 0x000008;

    pub fn parse(flags: u32) -> Self {
        TkhdFlags {
            enabled: flags & Self::ENABLED != 0,
            in_movie: flags & Self::IN_MOVIE != 0,
            in_preview: flags & Self::IN_PREVIEW != 0,
            size_is_aspect_ratio: flags & Self::SIZE_IS_ASPECT_RATIO != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TkhdBox {
    pub flags: TkhdFlags,
    #[serde(flatten)]
    pub times: MediaTimes,
    pub track_id: u32,
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: f64,
    pub matrix: [f64; 9],
    pub width: f64,
    pub height: f64,
}

pub struct TkhdEncoding;

impl BoxEncoding for TkhdEncoding {
    fn box_type(&self) -> FourCC {
        TKHD
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, o) = ready!(parse_full_box_header(buf), 0);
        check_version(TKHD, full)?;
        let times_len = if full.version == 1 { 32 } else { 20 };
        let used = o + times_len + 60;
        need_within!(buf, used, header);

        // creation, modification, track_ID, reserved, duration
        let (times, track_id) = if full.version == 1 {
            let times = MediaTimes {
                creation_time: read_time64(buf, o, TKHD)?,
                modification_time: read_time64(buf, o + 8, TKHD)?,
                duration: read_safe_u64(buf, o + 24, TKHD)?,
            };
            (times, BigEndian::read_u32(&buf[o + 16..]))
        } else {
            let times = MediaTimes {
                creation_time: read_time32(buf, o),
                modification_time: read_time32(buf, o + 4),
                duration: BigEndian::read_u32(&buf[o + 16..]) as u64,
            };
            (times, BigEndian::read_u32(&buf[o + 8..]))
        };

        let p = o + times_len + 8;
        let body = TkhdBox {
            flags: TkhdFlags::parse(full.flags),
            times,
            track_id,
            layer: BigEndian::read_i16(&buf[p..]),
            alternate_group: BigEndian::read_i16(&buf[p + 2..]),
            volume: read_fixed8x8(buf, p + 4),
            matrix: read_matrix(buf, p + 8),
            width: read_fixed16x16(buf, p + 44),
            height: read_fixed16x16(buf, p + 48),
        };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }
}

// ---------- mdhd ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MdhdBox {
    #[serde(flatten)]
    pub times: MediaTimes,
    pub timescale: u32,
    /// ISO-639-2/T code, `und` when unset.
    pub language: String,
}

/// Unpacks three 5-bit letters offset from 0x60.
pub fn language_from_u16(code: u16) -> String {
    if code & 0x7FFF == 0 {
        return "und".to_string();
    }
    [10u16, 5, 0]
        .iter()
        .map(|shift| (((code >> shift) & 0x1F) as u8 + 0x60) as char)
        .collect()
}

pub struct MdhdEncoding;

impl BoxEncoding for MdhdEncoding {
    fn box_type(&self) -> FourCC {
        MDHD
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, o) = ready!(parse_full_box_header(buf), 0);
        check_version(MDHD, full)?;
        let times_len = if full.version == 1 { 28 } else { 16 };
        let used = o + times_len + 4;
        need_within!(buf, used, header);

        let (times, timescale) = if full.version == 1 {
            let times = MediaTimes {
                creation_time: read_time64(buf, o, MDHD)?,
                modification_time: read_time64(buf, o + 8, MDHD)?,
                duration: read_safe_u64(buf, o + 20, MDHD)?,
            };
            (times, BigEndian::read_u32(&buf[o + 16..]))
        } else {
            let times = MediaTimes {
                creation_time: read_time32(buf, o),
                modification_time: read_time32(buf, o + 4),
                duration: BigEndian::read_u32(&buf[o + 12..]) as u64,
            };
            (times, BigEndian::read_u32(&buf[o + 8..]))
        };
        let language = language_from_u16(BigEndian::read_u16(&buf[o + times_len..]));

        let body = MdhdBox { times, timescale, language };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }
}

// ---------- hdlr ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HdlrBox {
    pub handler_type: FourCC,
    pub name: String,
}

impl EncodeFields for HdlrBox {
    fn fields_length(&self, _full: Option<FullBoxHeader>) -> usize {
        4 + 4 + 12 + self.name.len() + 1
    }

    fn write_fields(&self, _full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        w.write_u32::<BigEndian>(0)?;
        w.write_all(&self.handler_type.0)?;
        w.write_all(&[0u8; 12])?;
        w.write_all(self.name.as_bytes())?;
        w.write_u8(0)?;
        Ok(())
    }
}

pub struct HdlrEncoding;

impl BoxEncoding for HdlrEncoding {
    fn box_type(&self) -> FourCC {
        HDLR
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, o) = ready!(parse_full_box_header(buf), 0);
        need_within!(buf, o + 20, header);
        // the name runs to the end of the box
        let end = content_len(header);
        need_within!(buf, end, header);

        let handler_type = read_fourcc(buf, o + 4);
        let (name, _) = read_cstring(&buf[o + 20..end]);
        let body = HdlrBox { handler_type, name };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), end, body), end))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<HdlrBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<HdlrBox>(b, buf)
    }
}

// ---------- stsd ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StsdBox {
    pub entry_count: u32,
}

/// `stsd`: a full box whose entries are child sample entry boxes.
pub struct StsdEncoding;

impl BoxEncoding for StsdEncoding {
    fn box_type(&self) -> FourCC {
        STSD
    }

    fn is_container(&self) -> bool {
        true
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, o) = ready!(parse_full_box_header(buf), 0);
        need_within!(buf, o + 4, header);
        let entry_count = BigEndian::read_u32(&buf[o..]);
        let used = o + 4;
        let b = Mp4Box::new(header.clone(), Some(full), used, StsdBox { entry_count })
            .into_container();
        Ok(Partial::Done(b, used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes() {
        // 'e' 'n' 'g' = 5, 14, 7
        assert_eq!(language_from_u16((5 << 10) | (14 << 5) | 7), "eng");
        assert_eq!(language_from_u16(0), "und");
    }

    #[test]
    fn mdhd_version_0() {
        let mut bytes = vec![0, 0, 0, 32, b'm', b'd', b'h', b'd', 0, 0, 0, 0];
        bytes.extend_from_slice(&[0, 0, 0, 1]); // creation
        bytes.extend_from_slice(&[0, 0, 0, 2]); // modification
        bytes.extend_from_slice(&[0, 0, 0x3E, 0x80]); // timescale 16000
        bytes.extend_from_slice(&[0, 0, 0x7D, 0x00]); // duration 32000
        bytes.extend_from_slice(&[0x15, 0xC7, 0, 0]); // eng, pre_defined
        let (b, used) = MdhdEncoding.decode(&bytes).unwrap().done().unwrap();
        assert_eq!(used, 32);
        let mdhd = b.body::<MdhdBox>().unwrap();
        assert_eq!(mdhd.timescale, 16000);
        assert_eq!(mdhd.times.duration, 32000);
        assert_eq!(mdhd.language, "eng");
    }

    #[test]
    fn mvhd_version_2_is_rejected() {
        let bytes = [0, 0, 0, 12, b'm', b'v', b'h', b'd', 2, 0, 0, 0];
        assert!(matches!(
            MvhdEncoding.decode(&bytes),
            Err(Error::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn hdlr_encodes_back_to_input() {
        let mut bytes = vec![0, 0, 0, 0x2D, b'h', b'd', b'l', b'r', 0, 0, 0, 0];
        bytes.extend_from_slice(&[0, 0, 0, 0]); // pre_defined
        bytes.extend_from_slice(b"vide");
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(b"VideoHandler\0");
        let (b, used) = HdlrEncoding.decode(&bytes).unwrap().done().unwrap();
        assert_eq!(used, 0x2D);
        let hdlr = b.body::<HdlrBox>().unwrap();
        assert_eq!(hdlr.handler_type, FourCC(*b"vide"));
        assert_eq!(hdlr.name, "VideoHandler");
        assert_eq!(HdlrEncoding.encode(&b).unwrap(), bytes);
    }
}
