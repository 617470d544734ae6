//! Movie fragment boxes: `moof`, `mfhd`, `traf`, `tfhd`, `tfdt` and `trun`.

use crate::boxes::{BoxHeader, FourCC, FullBoxHeader, Mp4Box, parse_full_box_header};
use crate::boxes_file::ContainerEncoding;
use crate::encoding::{
    BoxEncoding, EncodeFields, EncodingNode, Partial, encode_to_of, encoding_length_of,
    need_within, ready,
};
use crate::error::{Error, Result};
use crate::util::read_safe_u64;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::Serialize;
use std::io::Write;

pub const MOOF: FourCC = FourCC(*b"moof");
pub const MFHD: FourCC = FourCC(*b"mfhd");
pub const TRAF: FourCC = FourCC(*b"traf");
pub const TFHD: FourCC = FourCC(*b"tfhd");
pub const TFDT: FourCC = FourCC(*b"tfdt");
pub const TRUN: FourCC = FourCC(*b"trun");

/// `moof` with its standard children: `mfhd` and `traf` (`tfhd`, `tfdt`, `trun`).
pub fn moof_tree() -> Result<EncodingNode> {
    EncodingNode::new(ContainerEncoding::new(MOOF))
        .with_child(MfhdEncoding)?
        .with_child(traf_tree()?)
}

pub fn traf_tree() -> Result<EncodingNode> {
    EncodingNode::new(ContainerEncoding::new(TRAF))
        .with_child(TfhdEncoding)?
        .with_child(TfdtEncoding)?
        .with_child(TrunEncoding)
}

fn unsupported_version(box_type: FourCC, full: FullBoxHeader) -> Error {
    Error::UnsupportedVersion { box_type, version: full.version }
}

// ---------- mfhd ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl EncodeFields for MfhdBox {
    fn fields_length(&self, _full: Option<FullBoxHeader>) -> usize {
        4
    }

    fn write_fields(&self, _full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        w.write_u32::<BigEndian>(self.sequence_number)?;
        Ok(())
    }
}

pub struct MfhdEncoding;

impl BoxEncoding for MfhdEncoding {
    fn box_type(&self) -> FourCC {
        MFHD
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, offset) = ready!(parse_full_box_header(buf), 0);
        need_within!(buf, offset + 4, header);
        let sequence_number = BigEndian::read_u32(&buf[offset..]);
        let used = offset + 4;
        let body = MfhdBox { sequence_number };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<MfhdBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<MfhdBox>(b, buf)
    }
}

// ---------- tfhd ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TfhdFlags {
    pub base_data_offset_present: bool,
    pub sample_description_index_present: bool,
    pub default_sample_duration_present: bool,
    pub default_sample_size_present: bool,
    pub default_sample_flags_present: bool,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,
}

impl TfhdFlags {
    pub const BASE_DATA_OFFSET: u32 = 0x000001;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
    pub const DEFAULT_SAMPLE_DURATION: u32 = 0x000008;
    pub const DEFAULT_SAMPLE_SIZE: u32 = 0x000010;
    pub const DEFAULT_SAMPLE_FLAGS: u32 = 0x000020;
    pub const DURATION_IS_EMPTY: u32 = 0x010000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

    pub fn parse(flags: u32) -> Self {
        TfhdFlags {
            base_data_offset_present: flags & Self::BASE_DATA_OFFSET != 0,
            sample_description_index_present: flags & Self::SAMPLE_DESCRIPTION_INDEX != 0,
            default_sample_duration_present: flags & Self::DEFAULT_SAMPLE_DURATION != 0,
            default_sample_size_present: flags & Self::DEFAULT_SAMPLE_SIZE != 0,
            default_sample_flags_present: flags & Self::DEFAULT_SAMPLE_FLAGS != 0,
            duration_is_empty: flags & Self::DURATION_IS_EMPTY != 0,
            default_base_is_moof: flags & Self::DEFAULT_BASE_IS_MOOF != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TfhdBox {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl EncodeFields for TfhdBox {
    fn fields_length(&self, full: Option<FullBoxHeader>) -> usize {
        let f = TfhdFlags::parse(full.unwrap_or_default().flags);
        4 + if f.base_data_offset_present { 8 } else { 0 }
            + [
                f.sample_description_index_present,
                f.default_sample_duration_present,
                f.default_sample_size_present,
                f.default_sample_flags_present,
            ]
            .iter()
            .filter(|&&p| p)
            .count()
                * 4
    }

    fn write_fields(&self, full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        let f = TfhdFlags::parse(full.unwrap_or_default().flags);
        w.write_u32::<BigEndian>(self.track_id)?;
        if f.base_data_offset_present {
            w.write_u64::<BigEndian>(self.base_data_offset.unwrap_or(0))?;
        }
        let optional = [
            (f.sample_description_index_present, self.sample_description_index),
            (f.default_sample_duration_present, self.default_sample_duration),
            (f.default_sample_size_present, self.default_sample_size),
            (f.default_sample_flags_present, self.default_sample_flags),
        ];
        for (present, value) in optional {
            if present {
                w.write_u32::<BigEndian>(value.unwrap_or(0))?;
            }
        }
        Ok(())
    }
}

pub struct TfhdEncoding;

impl BoxEncoding for TfhdEncoding {
    fn box_type(&self) -> FourCC {
        TFHD
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, mut offset) = ready!(parse_full_box_header(buf), 0);
        let flags = TfhdFlags::parse(full.flags);

        need_within!(buf, offset + 4, header);
        let track_id = BigEndian::read_u32(&buf[offset..]);
        offset += 4;

        let mut base_data_offset = None;
        if flags.base_data_offset_present {
            need_within!(buf, offset + 8, header);
            base_data_offset = Some(read_safe_u64(buf, offset, TFHD)?);
            offset += 8;
        }

        let read_opt = |present: bool, offset: &mut usize| -> Result<Partial<Option<u32>>> {
            if !present {
                return Ok(Partial::Done(None, 0));
            }
            need_within!(buf, *offset + 4, header);
            let v = BigEndian::read_u32(&buf[*offset..]);
            *offset += 4;
            Ok(Partial::Done(Some(v), 4))
        };
        let (sample_description_index, _) =
            ready!(read_opt(flags.sample_description_index_present, &mut offset), 0);
        let (default_sample_duration, _) =
            ready!(read_opt(flags.default_sample_duration_present, &mut offset), 0);
        let (default_sample_size, _) =
            ready!(read_opt(flags.default_sample_size_present, &mut offset), 0);
        let (default_sample_flags, _) =
            ready!(read_opt(flags.default_sample_flags_present, &mut offset), 0);

        let body = TfhdBox {
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), offset, body), offset))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<TfhdBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<TfhdBox>(b, buf)
    }
}

// ---------- tfdt ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TfdtBox {
    pub base_media_decode_time: u64,
}

impl EncodeFields for TfdtBox {
    fn fields_length(&self, full: Option<FullBoxHeader>) -> usize {
        if full.unwrap_or_default().version == 1 { 8 } else { 4 }
    }

    fn write_fields(&self, full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        let time = self.base_media_decode_time;
        if full.unwrap_or_default().version == 1 {
            w.write_u64::<BigEndian>(time)?;
        } else {
            let time = u32::try_from(time)
                .map_err(|_| Error::ValueOverflow { box_type: TFDT, value: time })?;
            w.write_u32::<BigEndian>(time)?;
        }
        Ok(())
    }
}

pub struct TfdtEncoding;

impl BoxEncoding for TfdtEncoding {
    fn box_type(&self) -> FourCC {
        TFDT
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, offset) = ready!(parse_full_box_header(buf), 0);
        let (base_media_decode_time, used) = match full.version {
            0 => {
                need_within!(buf, offset + 4, header);
                (BigEndian::read_u32(&buf[offset..]) as u64, offset + 4)
            }
            1 => {
                need_within!(buf, offset + 8, header);
                (read_safe_u64(buf, offset, TFDT)?, offset + 8)
            }
            _ => return Err(unsupported_version(TFDT, full)),
        };
        let body = TfdtBox { base_media_decode_time };
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<TfdtBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<TfdtBox>(b, buf)
    }
}

// ---------- trun ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrunFlags {
    pub data_offset_present: bool,
    pub first_sample_flags_present: bool,
    pub sample_duration_present: bool,
    pub sample_size_present: bool,
    pub sample_flags_present: bool,
    pub sample_composition_time_offsets_present: bool,
}

impl TrunFlags {
    pub const DATA_OFFSET: u32 = 0x000001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x000004;
    pub const SAMPLE_DURATION: u32 = 0x000100;
    pub const SAMPLE_SIZE: u32 = 0x000200;
    pub const SAMPLE_FLAGS: u32 = 0x000400;
    pub const SAMPLE_COMPOSITION_TIME_OFFSETS: u32 = 0x000800;

    pub fn parse(flags: u32) -> Self {
        TrunFlags {
            data_offset_present: flags & Self::DATA_OFFSET != 0,
            first_sample_flags_present: flags & Self::FIRST_SAMPLE_FLAGS != 0,
            sample_duration_present: flags & Self::SAMPLE_DURATION != 0,
            sample_size_present: flags & Self::SAMPLE_SIZE != 0,
            sample_flags_present: flags & Self::SAMPLE_FLAGS != 0,
            sample_composition_time_offsets_present: flags
                & Self::SAMPLE_COMPOSITION_TIME_OFFSETS
                != 0,
        }
    }

    fn bytes_per_sample(&self) -> usize {
        [
            self.sample_duration_present,
            self.sample_size_present,
            self.sample_flags_present,
            self.sample_composition_time_offsets_present,
        ]
        .iter()
        .filter(|&&p| p)
        .count()
            * 4
    }

    fn header_fields_length(&self) -> usize {
        let data_offset = if self.data_offset_present { 4 } else { 0 };
        let first_flags = if self.first_sample_flags_present { 4 } else { 0 };
        4 + data_offset + first_flags
    }
}

/// The 32-bit per-sample flags word used by `trun`, `tfhd` and `trex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleFlags {
    /// 0 unknown, 1 leading with dependency, 2 not leading, 3 leading without dependency.
    pub is_leading: u8,
    /// 0 unknown, 1 depends on others, 2 independent (I picture).
    pub depends_on: u8,
    /// 0 unknown, 1 not disposable, 2 disposable.
    pub is_depended_on: u8,
    /// 0 unknown, 1 redundant coding, 2 no redundant coding.
    pub has_redundancy: u8,
    pub padding_value: u8,
    pub is_non_sync: bool,
    pub degradation_priority: u16,
}

impl SampleFlags {
    pub fn parse(flags: u32) -> Self {
        SampleFlags {
            is_leading: ((flags >> 26) & 0b11) as u8,
            depends_on: ((flags >> 24) & 0b11) as u8,
            is_depended_on: ((flags >> 22) & 0b11) as u8,
            has_redundancy: ((flags >> 20) & 0b11) as u8,
            padding_value: ((flags >> 17) & 0b111) as u8,
            is_non_sync: (flags >> 16) & 0b1 != 0,
            degradation_priority: (flags & 0xFFFF) as u16,
        }
    }

    pub fn is_sync(&self) -> bool {
        !self.is_non_sync
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_time_offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrunBox {
    pub sample_count: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    /// One entry per sample. Empty when the run carries no per-sample fields.
    pub samples: Vec<TrunSample>,
}

impl EncodeFields for TrunBox {
    fn fields_length(&self, full: Option<FullBoxHeader>) -> usize {
        let f = TrunFlags::parse(full.unwrap_or_default().flags);
        let per_sample = f.bytes_per_sample();
        f.header_fields_length() + per_sample * self.sample_count as usize
    }

    fn write_fields(&self, full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        let full = full.unwrap_or_default();
        let f = TrunFlags::parse(full.flags);
        w.write_u32::<BigEndian>(self.sample_count)?;
        if f.data_offset_present {
            w.write_i32::<BigEndian>(self.data_offset.unwrap_or(0))?;
        }
        if f.first_sample_flags_present {
            w.write_u32::<BigEndian>(self.first_sample_flags.unwrap_or(0))?;
        }
        if f.bytes_per_sample() == 0 {
            return Ok(());
        }
        let missing = TrunSample::default();
        for i in 0..self.sample_count as usize {
            let s = self.samples.get(i).unwrap_or(&missing);
            if f.sample_duration_present {
                w.write_u32::<BigEndian>(s.duration.unwrap_or(0))?;
            }
            if f.sample_size_present {
                w.write_u32::<BigEndian>(s.size.unwrap_or(0))?;
            }
            if f.sample_flags_present {
                w.write_u32::<BigEndian>(s.flags.unwrap_or(0))?;
            }
            if f.sample_composition_time_offsets_present {
                let cto = s.composition_time_offset.unwrap_or(0);
                let out_of_range = || Error::FieldOutOfRange {
                    box_type: TRUN,
                    field: "composition_time_offset",
                    value: cto,
                };
                if full.version == 0 {
                    w.write_u32::<BigEndian>(u32::try_from(cto).map_err(|_| out_of_range())?)?;
                } else {
                    w.write_i32::<BigEndian>(i32::try_from(cto).map_err(|_| out_of_range())?)?;
                }
            }
        }
        Ok(())
    }
}

pub struct TrunEncoding;

impl BoxEncoding for TrunEncoding {
    fn box_type(&self) -> FourCC {
        TRUN
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (full, mut offset) = ready!(parse_full_box_header(buf), 0);
        if full.version > 1 {
            return Err(unsupported_version(TRUN, full));
        }
        let flags = TrunFlags::parse(full.flags);
        if flags.first_sample_flags_present && flags.sample_flags_present {
            return Err(Error::InvalidFlags {
                box_type: TRUN,
                flags: full.flags,
                reason: "first-sample flags and per-sample flags are mutually exclusive",
            });
        }

        need_within!(buf, offset + 4, header);
        let sample_count = BigEndian::read_u32(&buf[offset..]) as usize;
        offset += 4;

        let mut data_offset = None;
        if flags.data_offset_present {
            need_within!(buf, offset + 4, header);
            data_offset = Some(BigEndian::read_i32(&buf[offset..]));
            offset += 4;
        }

        let mut first_sample_flags = None;
        if flags.first_sample_flags_present {
            need_within!(buf, offset + 4, header);
            first_sample_flags = Some(BigEndian::read_u32(&buf[offset..]));
            offset += 4;
        }

        let per_sample = flags.bytes_per_sample();
        need_within!(buf, offset.saturating_add(per_sample.saturating_mul(sample_count)), header);

        let table_len = if per_sample == 0 { 0 } else { sample_count };
        let mut samples = Vec::with_capacity(table_len);
        let mut next = || {
            let v = BigEndian::read_u32(&buf[offset..]);
            offset += 4;
            v
        };
        for i in 0..table_len {
            let mut s = TrunSample::default();
            if flags.sample_duration_present {
                s.duration = Some(next());
            }
            if flags.sample_size_present {
                s.size = Some(next());
            }
            if flags.sample_flags_present {
                s.flags = Some(next());
            } else if i == 0 {
                s.flags = first_sample_flags;
            }
            if flags.sample_composition_time_offsets_present {
                let raw = next();
                s.composition_time_offset = Some(if full.version == 0 {
                    raw as i64
                } else {
                    raw as i32 as i64
                });
            }
            samples.push(s);
        }

        let body = TrunBox {
            sample_count: sample_count as u32,
            data_offset,
            first_sample_flags,
            samples,
        };
        let used = offset;
        Ok(Partial::Done(Mp4Box::new(header.clone(), Some(full), used, body), used))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<TrunBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<TrunBox>(b, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUN_BYTES: &[u8] = &[
        0x00, 0x00, 0x00, 0x14, b't', b'r', b'u', b'n', // size 20
        0x00, 0x00, 0x00, 0x01, // version 0, data offset present
        0x00, 0x00, 0x00, 0x01, // sample count 1
        0x00, 0x00, 0x00, 0x68, // data offset 104
    ];

    #[test]
    fn trun_with_data_offset_only() {
        let (b, used) = TrunEncoding.decode(TRUN_BYTES).unwrap().done().unwrap();
        assert_eq!(used, 20);
        assert_eq!(b.header.size, 20);
        let trun = b.body::<TrunBox>().unwrap();
        assert_eq!(trun.sample_count, 1);
        assert_eq!(trun.data_offset, Some(104));
        assert!(trun.samples.is_empty());
        assert_eq!(TrunEncoding.encode(&b).unwrap(), TRUN_BYTES);
    }

    #[test]
    fn trun_rejects_conflicting_sample_flags() {
        let mut bytes = TRUN_BYTES.to_vec();
        bytes[10] = 0x04; // sample flags present
        bytes[11] = 0x05; // data offset + first sample flags
        assert!(matches!(TrunEncoding.decode(&bytes), Err(Error::InvalidFlags { .. })));
    }

    #[test]
    fn trun_sample_table_must_fit_in_box() {
        let mut bytes = TRUN_BYTES.to_vec();
        bytes[10] = 0x01; // sample durations present
        bytes[15] = 0x10; // 16 samples in a 20 byte box
        assert!(matches!(TrunEncoding.decode(&bytes), Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn tfdt_version_2_is_rejected() {
        let bytes = [0, 0, 0, 16, b't', b'f', b'd', b't', 2, 0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            TfdtEncoding.decode(&bytes),
            Err(Error::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn tfdt_v0_encode_rejects_64_bit_time() {
        let full = FullBoxHeader::new(0, 0);
        let body = TfdtBox { base_media_decode_time: 1 << 32 };
        let b = Mp4Box::new(BoxHeader::for_content(TFDT, None, 8), Some(full), 8, body);
        assert!(matches!(
            TfdtEncoding.encode(&b),
            Err(Error::ValueOverflow { value, .. }) if value == 1 << 32
        ));

        let full = FullBoxHeader::new(1, 0);
        let body = TfdtBox { base_media_decode_time: 1 << 32 };
        let b = Mp4Box::new(BoxHeader::for_content(TFDT, None, 12), Some(full), 12, body);
        assert_eq!(TfdtEncoding.encode(&b).unwrap().len(), 20);
    }

    #[test]
    fn trun_encode_rejects_offsets_outside_the_version_range() {
        let trun = |version, cto| {
            let sample = TrunSample { composition_time_offset: Some(cto), ..Default::default() };
            let body = TrunBox {
                sample_count: 1,
                data_offset: None,
                first_sample_flags: None,
                samples: vec![sample],
            };
            let full = FullBoxHeader::new(version, TrunFlags::SAMPLE_COMPOSITION_TIME_OFFSETS);
            Mp4Box::new(BoxHeader::for_content(TRUN, None, 12), Some(full), 12, body)
        };
        assert!(matches!(
            TrunEncoding.encode(&trun(1, 1 << 40)),
            Err(Error::FieldOutOfRange { value, .. }) if value == 1 << 40
        ));
        assert!(matches!(
            TrunEncoding.encode(&trun(0, -1)),
            Err(Error::FieldOutOfRange { value: -1, .. })
        ));
        assert_eq!(TrunEncoding.encode(&trun(1, -1)).unwrap().len(), 20);
    }

    #[test]
    fn sample_flags_sync_bit() {
        assert!(SampleFlags::parse(0x0200_0000).is_sync());
        assert!(!SampleFlags::parse(0x0101_0000).is_sync());
        assert_eq!(SampleFlags::parse(0x0200_0000).depends_on, 2);
    }
}
