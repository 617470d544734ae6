use crate::encoding::{Partial, need};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Length of the compact `size` + `type` header.
pub const BOX_HEADER_LENGTH: usize = 8;

/// Length of the `version` + `flags` header extension of a full box.
pub const FULL_BOX_HEADER_LENGTH: usize = 4;

/// Largest box size accepted from a 64-bit `largesize` field (2^53 - 1).
pub const MAX_BOX_SIZE: u64 = (1 << 53) - 1;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const UUID: FourCC = FourCC(*b"uuid");

    pub const fn new(bytes: &[u8; 4]) -> Self {
        FourCC(*bytes)
    }

    /// Reads a FourCC from the first four bytes of `buf`.
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let b: [u8; 4] = buf.get(..4)?.try_into().ok()?;
        Some(FourCC(b))
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }
}

impl FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
            .filter(|_| s.len() == 4)
            .ok_or_else(|| format!("FourCC must be exactly 4 bytes: {s:?}"))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}
impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxHeader {
    /// Total size of the box: header, fields and children.
    pub size: u64,
    pub typ: FourCC,
    /// Raw 64-bit size, present when the compact size field was 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largesize: Option<u64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "crate::util::serialize_opt_hex"
    )]
    pub usertype: Option<[u8; 16]>,
}

impl BoxHeader {
    /// Builds the header for a box whose content (fields and children) is
    /// `content_length` bytes, switching to the large-size form when needed.
    pub fn for_content(typ: FourCC, usertype: Option<[u8; 16]>, content_length: u64) -> Self {
        let uuid_len = if usertype.is_some() { 16 } else { 0 };
        let compact = BOX_HEADER_LENGTH as u64 + uuid_len + content_length;
        if compact <= u32::MAX as u64 {
            BoxHeader { size: compact, typ, largesize: None, usertype }
        } else {
            let size = compact + 8;
            BoxHeader { size, typ, largesize: Some(size), usertype }
        }
    }

    /// Number of bytes occupied by the header itself: 8, 16, 24 or 32.
    pub fn header_length(&self) -> usize {
        let mut len = BOX_HEADER_LENGTH;
        if self.largesize.is_some() {
            len += 8;
        }
        if self.usertype.is_some() {
            len += 16;
        }
        len
    }

    /// Size of everything after the header.
    pub fn content_length(&self) -> u64 {
        self.size.saturating_sub(self.header_length() as u64)
    }

    pub fn encoding_length(&self) -> usize {
        self.header_length()
    }

    /// Writes the header to the start of `buf`, returning the number of bytes
    /// written.
    pub fn encode_to(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.header_length();
        let mut w = buf;
        match self.largesize {
            Some(large) => {
                w.write_u32::<BigEndian>(1)?;
                w.write_all(&self.typ.0)?;
                w.write_u64::<BigEndian>(large)?;
            }
            None => {
                let size = u32::try_from(self.size)
                    .map_err(|_| Error::InvalidBoxSize { box_type: self.typ, size: self.size })?;
                w.write_u32::<BigEndian>(size)?;
                w.write_all(&self.typ.0)?;
            }
        }
        if let Some(uuid) = &self.usertype {
            w.write_all(uuid)?;
        }
        Ok(len)
    }
}

/// Structural rules applied while parsing a [`BoxHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRules {
    /// Accept boxes that consist of nothing but their header.
    pub allow_empty: bool,
}

impl HeaderRules {
    pub const fn strict() -> Self {
        HeaderRules { allow_empty: false }
    }

    pub const fn lenient() -> Self {
        HeaderRules { allow_empty: true }
    }
}

impl Default for HeaderRules {
    fn default() -> Self {
        Self::strict()
    }
}

/// Parses a box header from the start of `buf`.
///
/// On success the consumed byte count equals the header length. If `buf` is
/// too short, the total number of bytes needed is returned instead.
pub fn parse_box_header(buf: &[u8]) -> Result<Partial<BoxHeader>> {
    parse_box_header_with(buf, HeaderRules::strict())
}

pub fn parse_box_header_with(buf: &[u8], rules: HeaderRules) -> Result<Partial<BoxHeader>> {
    let mut header_length = BOX_HEADER_LENGTH;
    need!(buf, header_length);

    let compact = BigEndian::read_u32(&buf[0..4]);
    let typ = FourCC([buf[4], buf[5], buf[6], buf[7]]);
    let mut size = compact as u64;
    let mut largesize = None;

    match compact {
        0 => return Err(Error::UnsupportedIndefiniteSize { box_type: typ }),
        1 => {
            header_length += 8;
            need!(buf, header_length);
            let large = BigEndian::read_u64(&buf[8..16]);
            if large > MAX_BOX_SIZE {
                return Err(Error::SizeOverflow {
                    box_type: typ,
                    largesize: large,
                    max: MAX_BOX_SIZE,
                });
            }
            largesize = Some(large);
            size = large;
        }
        2..=7 => return Err(Error::InvalidBoxSize { box_type: typ, size }),
        8 if !rules.allow_empty => return Err(Error::EmptyBoxUnsupported { box_type: typ }),
        _ => {}
    }

    let mut usertype = None;
    if typ == FourCC::UUID {
        let start = header_length;
        header_length += 16;
        need!(buf, header_length);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[start..header_length]);
        usertype = Some(uuid);
    }

    if size < header_length as u64 {
        return Err(Error::InvalidBoxSize { box_type: typ, size });
    }

    Ok(Partial::Done(
        BoxHeader { size, typ, largesize, usertype },
        header_length,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FullBoxHeader {
    pub version: u8,
    /// 24-bit flag field.
    pub flags: u32,
}

impl FullBoxHeader {
    pub fn new(version: u8, flags: u32) -> Self {
        FullBoxHeader { version, flags: flags & 0x00FF_FFFF }
    }

    pub fn has_flag(&self, mask: u32) -> bool {
        self.flags & mask != 0
    }

    pub fn encode_to(&self, buf: &mut [u8]) -> Result<usize> {
        let mut w = buf;
        w.write_u8(self.version)?;
        w.write_u24::<BigEndian>(self.flags & 0x00FF_FFFF)?;
        Ok(FULL_BOX_HEADER_LENGTH)
    }
}

/// Parses the 4-byte version/flags extension of a full box.
pub fn parse_full_box_header(buf: &[u8]) -> Result<Partial<FullBoxHeader>> {
    need!(buf, FULL_BOX_HEADER_LENGTH);
    let version = buf[0];
    let flags = BigEndian::read_u24(&buf[1..4]);
    Ok(Partial::Done(
        FullBoxHeader { version, flags },
        FULL_BOX_HEADER_LENGTH,
    ))
}

/// Type-specific fields of a decoded box.
///
/// Implemented for every `Debug + Serialize` type; use [`Mp4Box::body`] to get
/// the concrete struct back.
pub trait BoxBody: fmt::Debug + Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn to_json(&self) -> serde_json::Value;
}

impl<T> BoxBody for T
where
    T: fmt::Debug + Serialize + Any + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Body of boxes that carry no fields of their own (plain containers, `mdat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NoFields;

/// A decoded box: header, optional full-box header, its fields and, for
/// containers, the children decoded so far.
#[derive(Debug)]
pub struct Mp4Box {
    pub header: BoxHeader,
    pub full: Option<FullBoxHeader>,
    /// Header plus decoded fields, excluding children.
    pub length: u64,
    pub body: Box<dyn BoxBody>,
    pub children: Option<BoxContainer>,
}

impl Mp4Box {
    /// `fields_length` counts the bytes after the box header.
    pub fn new<B: BoxBody>(
        header: BoxHeader,
        full: Option<FullBoxHeader>,
        fields_length: usize,
        body: B,
    ) -> Self {
        let length = header.header_length() as u64 + fields_length as u64;
        Mp4Box { header, full, length, body: Box::new(body), children: None }
    }

    /// Marks the box as a container, ready to receive children.
    pub fn into_container(mut self) -> Self {
        self.children.get_or_insert_with(BoxContainer::default);
        self
    }

    pub fn box_type(&self) -> FourCC {
        self.header.typ
    }

    pub fn version(&self) -> Option<u8> {
        self.full.map(|f| f.version)
    }

    pub fn flags(&self) -> Option<u32> {
        self.full.map(|f| f.flags)
    }

    pub fn is_container(&self) -> bool {
        self.children.is_some()
    }

    pub fn body<T: BoxBody>(&self) -> Option<&T> {
        let body: &dyn BoxBody = &*self.body;
        body.as_any().downcast_ref::<T>()
    }

    /// Children of the given type, in stream order. Empty for leaf boxes.
    pub fn children_of(&self, typ: FourCC) -> &[Mp4Box] {
        self.children.as_ref().map(|c| c.get(typ)).unwrap_or(&[])
    }

    pub fn child(&self, typ: FourCC) -> Option<&Mp4Box> {
        self.children_of(typ).first()
    }

    /// Appends a decoded child; ignored for boxes that are not containers.
    pub fn attach(&mut self, child: Mp4Box) -> bool {
        match self.children.as_mut() {
            Some(c) => {
                c.push(child);
                true
            }
            None => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), self.header.typ.as_str_lossy().into());
        obj.insert("size".into(), self.header.size.into());
        obj.insert("header_length".into(), self.header.header_length().into());
        if let Some(uuid) = &self.header.usertype {
            obj.insert("usertype".into(), hex::encode(uuid).into());
        }
        if let Some(full) = self.full {
            obj.insert("version".into(), full.version.into());
            obj.insert("flags".into(), full.flags.into());
        }
        let fields = self.body.to_json();
        if !fields.is_null() {
            obj.insert("fields".into(), fields);
        }
        if let Some(children) = &self.children {
            let kids: Vec<serde_json::Value> = children.iter().map(|c| c.to_json()).collect();
            obj.insert("children".into(), kids.into());
        }
        serde_json::Value::Object(obj)
    }
}

/// Children of a decoded container, grouped by type.
#[derive(Debug, Default)]
pub struct BoxContainer {
    by_type: BTreeMap<FourCC, Vec<Mp4Box>>,
    count: usize,
}

impl BoxContainer {
    pub fn push(&mut self, child: Mp4Box) {
        self.by_type.entry(child.header.typ).or_default().push(child);
        self.count += 1;
    }

    pub fn get(&self, typ: FourCC) -> &[Mp4Box] {
        self.by_type.get(&typ).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn types(&self) -> impl Iterator<Item = FourCC> + '_ {
        self.by_type.keys().copied()
    }

    /// All children, grouped by type (types in byte order).
    pub fn iter(&self) -> impl Iterator<Item = &Mp4Box> + '_ {
        self.by_type.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
