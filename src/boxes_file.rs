//! File-level boxes: `ftyp`, `mdat`, and the generic container encoding used
//! for boxes whose payload is nothing but children.

use crate::boxes::{BoxHeader, FourCC, FullBoxHeader, Mp4Box, NoFields};
use crate::encoding::{BoxEncoding, EncodeFields, Partial, encode_to_of, encoding_length_of, need};
use crate::error::{Error, Result};
use crate::util::{content_len, read_fourcc};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use serde::Serialize;
use std::io::Write;

pub const FTYP: FourCC = FourCC(*b"ftyp");
pub const MDAT: FourCC = FourCC(*b"mdat");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FtypBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl EncodeFields for FtypBox {
    fn fields_length(&self, _full: Option<FullBoxHeader>) -> usize {
        8 + self.compatible_brands.len() * 4
    }

    fn write_fields(&self, _full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()> {
        w.write_all(&self.major_brand.0)?;
        w.write_u32::<BigEndian>(self.minor_version)?;
        for brand in &self.compatible_brands {
            w.write_all(&brand.0)?;
        }
        Ok(())
    }
}

pub struct FtypEncoding;

impl BoxEncoding for FtypEncoding {
    fn box_type(&self) -> FourCC {
        FTYP
    }

    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        // ftyp has no children; brands run to the end of the box
        let end = content_len(header);
        if end < 8 {
            return Err(Error::InvalidBoxSize { box_type: FTYP, size: header.size });
        }
        need!(buf, end);
        let major_brand = read_fourcc(buf, 0);
        let minor_version = BigEndian::read_u32(&buf[4..8]);
        let compatible_brands = buf[8..end]
            .chunks_exact(4)
            .map(|c| read_fourcc(c, 0))
            .collect();
        let body = FtypBox { major_brand, minor_version, compatible_brands };
        Ok(Partial::Done(Mp4Box::new(header.clone(), None, end, body), end))
    }

    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        encoding_length_of::<FtypBox>(b)
    }

    fn encode_to(&self, b: &Mp4Box, buf: &mut [u8]) -> Result<usize> {
        encode_to_of::<FtypBox>(b, buf)
    }
}

/// `mdat` carries no fields; its payload is always delivered as raw data.
pub struct MdatEncoding;

impl BoxEncoding for MdatEncoding {
    fn box_type(&self) -> FourCC {
        MDAT
    }

    fn decode_with_header(&self, header: &BoxHeader, _buf: &[u8]) -> Result<Partial<Mp4Box>> {
        Ok(Partial::Done(Mp4Box::new(header.clone(), None, 0, NoFields), 0))
    }
}

/// A box with no fields whose content is a sequence of child boxes
/// (`moov`, `trak`, `moof`, ...).
pub struct ContainerEncoding {
    typ: FourCC,
}

impl ContainerEncoding {
    pub fn new(typ: FourCC) -> Self {
        ContainerEncoding { typ }
    }
}

impl BoxEncoding for ContainerEncoding {
    fn box_type(&self) -> FourCC {
        self.typ
    }

    fn is_container(&self) -> bool {
        true
    }

    fn decode_with_header(&self, header: &BoxHeader, _buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let b = Mp4Box::new(header.clone(), None, 0, NoFields).into_container();
        Ok(Partial::Done(b, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FTYP_BYTES: &[u8] = &[
        0x00, 0x00, 0x00, 0x20, b'f', b't', b'y', b'p', // size 32
        b'm', b'p', b'4', b'2', 0x00, 0x00, 0x00, 0x00, // mp42, minor 0
        b'm', b'p', b'4', b'2', b'm', b'p', b'4', b'1', //
        b'i', b's', b'o', b'm', b'i', b's', b'o', b'2',
    ];

    #[test]
    fn ftyp_needs_more_for_every_prefix() {
        for n in 0..FTYP_BYTES.len() {
            let needed = FtypEncoding.decode(&FTYP_BYTES[..n]).unwrap().needed();
            assert!(needed.unwrap() > n, "prefix {n}");
        }
    }

    #[test]
    fn ftyp_encodes_back_to_input() {
        let (b, used) = FtypEncoding.decode(FTYP_BYTES).unwrap().done().unwrap();
        assert_eq!(used, 32);
        assert_eq!(FtypEncoding.encode(&b).unwrap(), FTYP_BYTES);
    }

    #[test]
    fn container_has_no_fields() {
        let bytes = [0, 0, 0, 16, b'm', b'o', b'o', b'v', 0, 0, 0, 8, b'f', b'r', b'e', b'e'];
        let enc = ContainerEncoding::new(FourCC(*b"moov"));
        let (b, used) = enc.decode(&bytes).unwrap().done().unwrap();
        assert_eq!(used, 8);
        assert!(b.is_container());
        assert_eq!(b.length, 8);
    }
}
