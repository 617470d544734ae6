//! The contract every box decoder implements, and the tree of encodings that
//! describes which boxes may nest inside which.

use crate::boxes::{
    BoxHeader, FULL_BOX_HEADER_LENGTH, FourCC, FullBoxHeader, Mp4Box, parse_box_header,
};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

/// Outcome of a decode attempt on a possibly incomplete buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partial<T> {
    /// The decoded value and the number of bytes it occupied.
    Done(T, usize),
    /// Total number of bytes, counted from the start of the buffer, required
    /// before decoding can make progress. Always larger than the buffer.
    Needed(usize),
}

impl<T> Partial<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Partial::Done(..))
    }

    pub fn needed(&self) -> Option<usize> {
        match self {
            Partial::Needed(n) => Some(*n),
            Partial::Done(..) => None,
        }
    }

    pub fn done(self) -> Option<(T, usize)> {
        match self {
            Partial::Done(v, n) => Some((v, n)),
            Partial::Needed(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        match self {
            Partial::Done(v, n) => Partial::Done(f(v), n),
            Partial::Needed(n) => Partial::Needed(n),
        }
    }
}

/// Returns `Partial::Needed(n)` from the enclosing decoder unless `buf` holds
/// at least `n` bytes.
macro_rules! need {
    ($buf:expr, $n:expr) => {{
        let n: usize = $n;
        if $buf.len() < n {
            return Ok($crate::encoding::Partial::Needed(n));
        }
    }};
}
pub(crate) use need;

/// Like [`need!`], for a buffer holding the content of the box described by
/// `$header`: asking for more bytes than the box contains is fatal.
macro_rules! need_within {
    ($buf:expr, $n:expr, $header:expr) => {{
        let n: usize = $n;
        $crate::encoding::check_within($header, n)?;
        if $buf.len() < n {
            return Ok($crate::encoding::Partial::Needed(n));
        }
    }};
}
pub(crate) use need_within;

/// Fails with `SizeMismatch` if `content_bytes` do not fit in the box content.
pub fn check_within(header: &BoxHeader, content_bytes: usize) -> Result<()> {
    if content_bytes as u64 > header.content_length() {
        return Err(Error::SizeMismatch {
            box_type: header.typ,
            declared: header.size,
            actual: header.header_length() as u64 + content_bytes as u64,
        });
    }
    Ok(())
}

/// Unwraps a nested `Result<Partial<T>>` decoded at offset `$base` of the
/// enclosing buffer, re-basing a bytes-needed answer onto that buffer.
macro_rules! ready {
    ($e:expr, $base:expr) => {
        match $e? {
            $crate::encoding::Partial::Done(v, n) => (v, n),
            $crate::encoding::Partial::Needed(n) => {
                return Ok($crate::encoding::Partial::Needed($base + n));
            }
        }
    };
}
pub(crate) use ready;

/// A decoder (and optionally encoder) for one box type.
///
/// Encodings hold no per-call state, so one instance may be shared by any
/// number of parsers.
pub trait BoxEncoding: Send + Sync {
    fn box_type(&self) -> FourCC;

    /// Whether the box content after its fields consists of child boxes.
    fn is_container(&self) -> bool {
        false
    }

    /// Decodes header and fields from the start of `buf`. The consumed count
    /// includes the header.
    fn decode(&self, buf: &[u8]) -> Result<Partial<Mp4Box>> {
        let (header, header_len) = ready!(parse_box_header(buf), 0);
        if header.typ != self.box_type() {
            return Err(Error::UnexpectedBoxType {
                expected: self.box_type(),
                actual: header.typ,
            });
        }
        let (b, used) = ready!(self.decode_with_header(&header, &buf[header_len..]), header_len);
        Ok(Partial::Done(b, header_len + used))
    }

    /// Decodes the fields of a box whose header was already parsed. `buf`
    /// starts right after the header; sizes are relative to it.
    fn decode_with_header(&self, header: &BoxHeader, buf: &[u8]) -> Result<Partial<Mp4Box>>;

    /// Exact number of bytes [`encode_to`](Self::encode_to) writes for `b`.
    fn encoding_length(&self, b: &Mp4Box) -> Result<usize> {
        Err(Error::EncodeUnsupported(b.header.typ))
    }

    /// Writes `b` to the start of `buf`. Returns 0 on success, otherwise the
    /// number of bytes `buf` is short by.
    fn encode_to(&self, b: &Mp4Box, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::EncodeUnsupported(b.header.typ))
    }

    fn encode(&self, b: &Mp4Box) -> Result<Vec<u8>> {
        let len = self.encoding_length(b)?;
        let mut buf = vec![0u8; len];
        let short = self.encode_to(b, &mut buf)?;
        if short > 0 {
            return Err(Error::EncodingLengthMismatch {
                box_type: b.header.typ,
                expected: len,
                short,
            });
        }
        Ok(buf)
    }
}

/// Fields of a leaf box that can be written back out.
pub trait EncodeFields: Sized + 'static {
    /// Bytes written by [`write_fields`](Self::write_fields), excluding the
    /// box header and the full-box header.
    fn fields_length(&self, full: Option<FullBoxHeader>) -> usize;

    fn write_fields(&self, full: Option<FullBoxHeader>, w: &mut dyn Write) -> Result<()>;
}

fn fields_of<T: EncodeFields + crate::boxes::BoxBody>(b: &Mp4Box) -> Result<&T> {
    b.body::<T>().ok_or(Error::BodyMismatch { box_type: b.header.typ })
}

fn header_for<T: EncodeFields + crate::boxes::BoxBody>(b: &Mp4Box, fields: &T) -> BoxHeader {
    let full_len = if b.full.is_some() { FULL_BOX_HEADER_LENGTH } else { 0 };
    let content = full_len + fields.fields_length(b.full);
    BoxHeader::for_content(b.header.typ, b.header.usertype, content as u64)
}

/// [`BoxEncoding::encoding_length`] for leaf boxes whose body is `T`.
pub fn encoding_length_of<T: EncodeFields + crate::boxes::BoxBody>(b: &Mp4Box) -> Result<usize> {
    let fields = fields_of::<T>(b)?;
    Ok(header_for(b, fields).size as usize)
}

/// [`BoxEncoding::encode_to`] for leaf boxes whose body is `T`. The header
/// size is recomputed from the fields.
pub fn encode_to_of<T: EncodeFields + crate::boxes::BoxBody>(
    b: &Mp4Box,
    buf: &mut [u8],
) -> Result<usize> {
    let fields = fields_of::<T>(b)?;
    let header = header_for(b, fields);
    let total = header.size as usize;
    if buf.len() < total {
        return Ok(total - buf.len());
    }
    let mut offset = header.encode_to(buf)?;
    if let Some(full) = b.full {
        offset += full.encode_to(&mut buf[offset..])?;
    }
    let mut w = &mut buf[offset..total];
    fields.write_fields(b.full, &mut w)?;
    Ok(0)
}

/// An encoding plus the encodings allowed as its direct children.
pub struct EncodingNode {
    encoding: Arc<dyn BoxEncoding>,
    children: BTreeMap<FourCC, Arc<EncodingNode>>,
}

impl EncodingNode {
    pub fn new<E: BoxEncoding + 'static>(encoding: E) -> Self {
        Self::from_arc(Arc::new(encoding))
    }

    pub fn from_arc(encoding: Arc<dyn BoxEncoding>) -> Self {
        EncodingNode { encoding, children: BTreeMap::new() }
    }

    pub fn box_type(&self) -> FourCC {
        self.encoding.box_type()
    }

    pub fn encoding(&self) -> &dyn BoxEncoding {
        self.encoding.as_ref()
    }

    /// Registers `child` as a legal child of this node.
    pub fn add_child(&mut self, child: impl Into<EncodingNode>) -> Result<()> {
        let child = child.into();
        let typ = child.box_type();
        if self.children.contains_key(&typ) {
            return Err(Error::DuplicateChildEncoding { parent: self.box_type(), child: typ });
        }
        self.children.insert(typ, Arc::new(child));
        Ok(())
    }

    pub fn with_child(mut self, child: impl Into<EncodingNode>) -> Result<Self> {
        self.add_child(child)?;
        Ok(self)
    }

    pub fn child(&self, typ: FourCC) -> Option<&Arc<EncodingNode>> {
        self.children.get(&typ)
    }

    pub fn child_types(&self) -> impl Iterator<Item = FourCC> + '_ {
        self.children.keys().copied()
    }
}

impl<E: BoxEncoding + 'static> From<E> for EncodingNode {
    fn from(encoding: E) -> Self {
        EncodingNode::new(encoding)
    }
}

impl std::fmt::Debug for EncodingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingNode")
            .field("type", &self.box_type())
            .field("children", &self.children.values().collect::<Vec<_>>())
            .finish()
    }
}
