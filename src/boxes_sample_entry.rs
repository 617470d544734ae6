//! Sample entries found inside `stsd`: the AVC visual sample entries
//! (`avc1`..`avc4`) and their `avcC` decoder configuration.

use crate::boxes::{BoxHeader, FourCC, Mp4Box, parse_box_header};
use crate::boxes_moov::STSD;
use crate::encoding::{BoxEncoding, Partial, check_within, need_within, ready};
use crate::error::{Error, Result};
use crate::util::{content_len, read_fixed16x16, read_fourcc};
use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;

pub const AVC1: FourCC = FourCC(*b"avc1");
pub const AVC2: FourCC = FourCC(*b"avc2");
pub const AVC3: FourCC = FourCC(*b"avc3");
pub const AVC4: FourCC = FourCC(*b"avc4");
pub const AVCC: FourCC = FourCC(*b"avcC");

pub const AVC_SAMPLE_ENTRY_TYPES: [FourCC; 4] = [AVC1, AVC2, AVC3, AVC4];

/// reserved(6) + data_reference_index(2)
const SAMPLE_ENTRY_LENGTH: usize = 8;
const VISUAL_SAMPLE_ENTRY_LENGTH: usize = 70;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horizontal_resolution: f64,
    pub vertical_resolution: f64,
    pub frame_count: u16,
    pub compressor_name: String,
    pub depth: u16,
}

/// Decodes the generic and visual sample entry fields. `buf` starts right
/// after the box header.
fn decode_visual_sample_entry(
    header: &BoxHeader,
    buf: &[u8],
) -> Result<Partial<VisualSampleEntry>> {
    let end = SAMPLE_ENTRY_LENGTH + VISUAL_SAMPLE_ENTRY_LENGTH;
    need_within!(buf, end, header);
    let data_reference_index = BigEndian::read_u16(&buf[6..]);

    let o = SAMPLE_ENTRY_LENGTH + 16; // pre_defined and reserved
    let name_len = (buf[o + 18] as usize).min(31);
    let name_start = o + 19;
    let name = &buf[name_start..name_start + name_len];
    let entry = VisualSampleEntry {
        data_reference_index,
        width: BigEndian::read_u16(&buf[o..]),
        height: BigEndian::read_u16(&buf[o + 2..]),
        horizontal_resolution: read_fixed16x16(buf, o + 4),
        vertical_resolution: read_fixed16x16(buf, o + 8),
        frame_count: BigEndian::read_u16(&buf[o + 16..]),
        compressor_name: name.iter().map(|&c| c as char).collect(),
        depth: BigEndian::read_u16(&buf[o + 50..]),
    };
    Ok(Partial::Done(entry, end))
}

// ---------- avcC ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvcConfigExt {
    /// High profile fields (profiles 100, 110, 122 and 144).
    High {
        chroma_format: u8,
        bit_depth_luma_minus8: u8,
        bit_depth_chroma_minus8: u8,
        #[serde(serialize_with = "crate::util::serialize_hex_list")]
        sequence_parameter_sets_ext: Vec<Vec<u8>>,
    },
    /// Trailing bytes of any other profile, kept verbatim.
    Raw(#[serde(serialize_with = "crate::util::serialize_hex")] Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvcConfigurationBox {
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub length_size_minus_one: u8,
    #[serde(serialize_with = "crate::util::serialize_hex_list")]
    pub sequence_parameter_sets: Vec<Vec<u8>>,
    #[serde(serialize_with = "crate::util::serialize_hex_list")]
    pub picture_parameter_sets: Vec<Vec<u8>>,
    pub ext: Option<AvcConfigExt>,
}

impl AvcConfigurationBox {
    /// Profile, compatibility and level as six hex digits, e.g. `64001f`.
    pub fn codec_string(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }
}

/// Reads a count byte (masked by `count_mask`) followed by that many
/// length-prefixed parameter sets starting at `offset`. `Done` carries the
/// offset just past the last set.
fn read_parameter_sets(
    header: &BoxHeader,
    buf: &[u8],
    mut offset: usize,
    count_mask: u8,
) -> Result<Partial<Vec<Vec<u8>>>> {
    need_within!(buf, offset + 1, header);
    let count = buf[offset] & count_mask;
    offset += 1;
    let mut sets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        need_within!(buf, offset + 2, header);
        let len = BigEndian::read_u16(&buf[offset..]) as usize;
        offset += 2;
        need_within!(buf, offset + len, header);
        sets.push(buf[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(Partial::Done(sets, offset))
}

pub struct AvcConfigurationEncoding;

impl BoxEncoding for AvcConfigurationEncoding {
    fn box_type(&self) -> FourCC {
        AVCC
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        need_within!(buf, 5, header);
        let configuration_version = buf[0];
        let profile_indication = buf[1];
        let profile_compatibility = buf[2];
        let level_indication = buf[3];
        let length_size_minus_one = buf[4] & 0b11;

        let (sequence_parameter_sets, offset) =
            ready!(read_parameter_sets(header, buf, 5, 0b1_1111), 0);
        let (picture_parameter_sets, mut offset) =
            ready!(read_parameter_sets(header, buf, offset, 0xFF), 0);

        let end = content_len(header);
        let mut ext = None;
        if offset < end {
            match profile_indication {
                100 | 110 | 122 | 144 => {
                    need_within!(buf, offset + 3, header);
                    let chroma_format = buf[offset] & 0b11;
                    let bit_depth_luma_minus8 = buf[offset + 1] & 0b111;
                    let bit_depth_chroma_minus8 = buf[offset + 2] & 0b111;
                    let (sequence_parameter_sets_ext, next) =
                        ready!(read_parameter_sets(header, buf, offset + 3, 0xFF), 0);
                    offset = next;
                    ext = Some(AvcConfigExt::High {
                        chroma_format,
                        bit_depth_luma_minus8,
                        bit_depth_chroma_minus8,
                        sequence_parameter_sets_ext,
                    });
                }
                _ => {
                    need_within!(buf, end, header);
                    ext = Some(AvcConfigExt::Raw(buf[offset..end].to_vec()));
                    offset = end;
                }
            }
        }
        // avcC has no children; anything left over belongs to it
        if offset < end {
            need_within!(buf, end, header);
        }

        let body = AvcConfigurationBox {
            configuration_version,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_minus_one,
            sequence_parameter_sets,
            picture_parameter_sets,
            ext,
        };
        Ok(Partial::Done(Mp4Box::new(header.clone(), None, end, body), end))
    }
}

// ---------- avc1..avc4 ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvcSampleEntryBox {
    #[serde(flatten)]
    pub entry: VisualSampleEntry,
    /// The `avcC` box, when it is the first child of the entry.
    pub config: Option<AvcConfigurationBox>,
}

/// AVC visual sample entry. The embedded `avcC` is decoded as part of the
/// entry's fields; any further children (`btrt`, `pasp`, ...) follow as
/// ordinary child boxes.
pub struct AvcSampleEntryEncoding {
    typ: FourCC,
}

impl AvcSampleEntryEncoding {
    pub fn new(typ: FourCC) -> Self {
        AvcSampleEntryEncoding { typ }
    }
}

impl BoxEncoding for AvcSampleEntryEncoding {
    fn box_type(&self) -> FourCC {
        self.typ
    }

    fn is_container(&self) -> bool {
        true
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (entry, mut offset) = ready!(decode_visual_sample_entry(header, buf), 0);

        let mut config = None;
        if content_len(header) >= offset + 8 {
            need_within!(buf, offset + 8, header);
            if read_fourcc(buf, offset + 4) == AVCC {
                let (avcc_header, avcc_header_len) =
                    ready!(parse_box_header(&buf[offset..]), offset);
                check_within(header, offset + avcc_header.size as usize)?;
                let fields_start = offset + avcc_header_len;
                let (avcc, used) = ready!(
                    AvcConfigurationEncoding.decode_with_header(&avcc_header, &buf[fields_start..]),
                    fields_start
                );
                config = avcc.body::<AvcConfigurationBox>().cloned();
                offset = fields_start + used;
            }
        }

        let body = AvcSampleEntryBox { entry, config };
        let b = Mp4Box::new(header.clone(), None, offset, body).into_container();
        Ok(Partial::Done(b, offset))
    }
}

impl AvcSampleEntryBox {
    /// RFC 6381 codec string such as `avc1.4d0029`, given the entry type.
    pub fn codec_string(&self, typ: FourCC) -> Option<String> {
        self.config.as_ref().map(|c| format!("{}.{}", typ, c.codec_string()))
    }
}

/// Codec string of the first AVC sample entry of a fully decoded `stsd`.
pub fn video_codec(stsd: &Mp4Box) -> Result<String> {
    for typ in AVC_SAMPLE_ENTRY_TYPES {
        let Some(entry) = stsd.child(typ) else { continue };
        return entry
            .body::<AvcSampleEntryBox>()
            .and_then(|avc| avc.codec_string(typ))
            .ok_or(Error::MissingBox { parent: typ, child: AVCC });
    }
    Err(Error::MissingBox { parent: STSD, child: AVC1 })
}
