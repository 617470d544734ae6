//! Incremental box parser driven by arbitrarily sized chunks.

use crate::boxes::{BoxHeader, FourCC, HeaderRules, Mp4Box, parse_box_header_with};
use crate::encoding::{EncodingNode, Partial};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::util::content_len;
use std::io::{ErrorKind, Read};
use std::mem;
use std::sync::Arc;

/// Receives parse events. Every method has a default, so implementors only
/// override what they need.
///
/// Bytes passed to the callbacks, concatenated in call order, reproduce the
/// input exactly: header bytes via [`on_box_started`](Self::on_box_started),
/// decoded field bytes via [`on_box_decoded`](Self::on_box_decoded), and
/// everything else via [`on_box_data`](Self::on_box_data).
pub trait ParserHandler {
    /// A box header was read. Return false to skip decoding its fields and
    /// deliver the rest of the box as raw data.
    fn on_box_started(&mut self, _header: &BoxHeader, _raw_header: &[u8]) -> bool {
        true
    }

    /// The fields of a registered box were decoded. Return false to deliver
    /// its remaining bytes as raw data instead of parsing its children.
    fn on_box_decoded(&mut self, _b: &Mp4Box, _raw_fields: &[u8]) -> bool {
        true
    }

    /// Raw bytes of a box that is not being decoded. May fire many times for
    /// one box.
    fn on_box_data(&mut self, _header: &BoxHeader, _data: &[u8]) {}

    /// The last byte of a box was consumed. `b` is present if its fields were
    /// decoded; decoded children are attached to it by now.
    fn on_box_ended(&mut self, _header: &BoxHeader, _b: Option<&Mp4Box>) {}

    /// A decoded top-level box, handed over after its
    /// [`on_box_ended`](Self::on_box_ended).
    fn on_top_level_box(&mut self, _b: Mp4Box) {}
}

impl ParserHandler for () {}

impl<H: ParserHandler + ?Sized> ParserHandler for &mut H {
    fn on_box_started(&mut self, header: &BoxHeader, raw_header: &[u8]) -> bool {
        (**self).on_box_started(header, raw_header)
    }

    fn on_box_decoded(&mut self, b: &Mp4Box, raw_fields: &[u8]) -> bool {
        (**self).on_box_decoded(b, raw_fields)
    }

    fn on_box_data(&mut self, header: &BoxHeader, data: &[u8]) {
        (**self).on_box_data(header, data)
    }

    fn on_box_ended(&mut self, header: &BoxHeader, b: Option<&Mp4Box>) {
        (**self).on_box_ended(header, b)
    }

    fn on_top_level_box(&mut self, b: Mp4Box) {
        (**self).on_top_level_box(b)
    }
}

/// Limits and structural rules applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Accept boxes consisting of nothing but a header.
    pub allow_empty_boxes: bool,
    /// Maximum number of simultaneously open boxes.
    pub max_depth: usize,
    /// Largest amount of field data buffered for a single box.
    pub max_field_bytes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            allow_empty_boxes: true,
            max_depth: 64,
            max_field_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ParserOptions {
    pub fn allow_empty_boxes(mut self, allow: bool) -> Self {
        self.allow_empty_boxes = allow;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_field_bytes(mut self, limit: usize) -> Self {
        self.max_field_bytes = limit;
        self
    }
}

/// What the parser expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Between top-level boxes.
    AwaitingHeader,
    /// Waiting for the fields of this box.
    DecodingFields(FourCC),
    /// Inside this container, between children.
    TraversingChildren(FourCC),
    /// Delivering the raw bytes of this box.
    PassthroughPayload(FourCC),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fields,
    Children,
    Payload,
}

/// One open box.
struct Frame {
    header: BoxHeader,
    node: Option<Arc<EncodingNode>>,
    decoded: Option<Mp4Box>,
    /// Bytes of this box accounted for so far, header included.
    consumed: u64,
    mode: Mode,
}

impl Frame {
    fn remaining(&self) -> u64 {
        self.header.size.saturating_sub(self.consumed)
    }
}

/// Streaming ISO BMFF parser.
///
/// Feed it bytes with [`append`](Self::append) in chunks of any size; events go
/// to the [`ParserHandler`]. Boxes whose type is registered (at the top level,
/// or as a child of the enclosing box's encoding) have their fields decoded;
/// all other bytes pass through untouched.
pub struct Mp4Parser<H: ParserHandler = ()> {
    registry: Registry,
    options: ParserOptions,
    handler: H,
    stack: Vec<Frame>,
    /// Bytes of an incomplete header or field block.
    pending: Vec<u8>,
    /// Total bytes `pending` must hold before decoding is retried.
    needed: usize,
    received: u64,
    failed: bool,
}

impl<H: ParserHandler> Mp4Parser<H> {
    /// A parser with no registered boxes: everything is delivered as raw data.
    pub fn new(handler: H) -> Self {
        Self::with_registry(Registry::new(), handler)
    }

    pub fn with_registry(registry: Registry, handler: H) -> Self {
        Mp4Parser {
            registry,
            options: ParserOptions::default(),
            handler,
            stack: Vec::new(),
            pending: Vec::new(),
            needed: 0,
            received: 0,
            failed: false,
        }
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Registers a top-level encoding. Only affects boxes that start after
    /// the call.
    pub fn register_box(&mut self, node: impl Into<EncodingNode>) -> Result<()> {
        self.registry.register_box(node)
    }

    pub fn is_box_registered(&self, typ: FourCC) -> bool {
        self.registry.is_box_registered(typ)
    }

    pub fn state(&self) -> ParserState {
        match self.stack.last() {
            None => ParserState::AwaitingHeader,
            Some(f) => match f.mode {
                Mode::Fields => ParserState::DecodingFields(f.header.typ),
                Mode::Children => ParserState::TraversingChildren(f.header.typ),
                Mode::Payload => ParserState::PassthroughPayload(f.header.typ),
            },
        }
    }

    /// Number of open boxes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// True between top-level boxes with nothing buffered, i.e. the input so
    /// far ended on a box boundary.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.pending.is_empty()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Parses as much of `chunk` as possible, buffering an incomplete header
    /// or field block until more bytes arrive.
    ///
    /// Any error is fatal: the parser rejects all later input with
    /// [`Error::ParserFailed`].
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        if self.failed {
            return Err(Error::ParserFailed);
        }
        self.received += chunk.len() as u64;
        let res = self.feed(chunk);
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    /// Reads `reader` to the end, appending `chunk_size` bytes at a time.
    /// Returns the number of bytes read.
    pub fn feed_reader<R: Read>(&mut self, mut reader: R, chunk_size: usize) -> Result<u64> {
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.append(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    fn feed(&mut self, input: &[u8]) -> Result<()> {
        let mut pos = 0;
        loop {
            self.close_completed()?;
            let rest = &input[pos..];
            let step = match self.stack.last().map(|f| f.mode) {
                None | Some(Mode::Children) => self.step_header(rest)?,
                Some(Mode::Fields) => self.step_fields(rest)?,
                Some(Mode::Payload) => self.step_payload(rest),
            };
            match step {
                Some(used) => pos += used,
                None => return Ok(()),
            }
        }
    }

    // Each step returns the number of input bytes it consumed, or None once
    // it cannot continue without more input.

    fn step_header(&mut self, input: &[u8]) -> Result<Option<usize>> {
        let rules = HeaderRules { allow_empty: self.options.allow_empty_boxes };

        if self.pending.is_empty() {
            if input.is_empty() {
                return Ok(None);
            }
            return match parse_box_header_with(input, rules)? {
                Partial::Done(header, len) => {
                    self.start_box(header, &input[..len])?;
                    Ok(Some(len))
                }
                Partial::Needed(n) => {
                    self.check_header_room(n, input)?;
                    self.buffer(input, n);
                    Ok(None)
                }
            };
        }

        let Some(take) = self.fill_pending(input) else {
            return Ok(None);
        };
        let buf = mem::take(&mut self.pending);
        match parse_box_header_with(&buf, rules)? {
            Partial::Done(header, len) => {
                self.start_box(header, &buf[..len])?;
                self.finish_pending(buf, len)?;
            }
            Partial::Needed(n) => {
                self.check_header_room(n, &buf)?;
                self.pending = buf;
                self.needed = n;
            }
        }
        Ok(Some(take))
    }

    fn step_fields(&mut self, input: &[u8]) -> Result<Option<usize>> {
        let Some(frame) = self.stack.last() else {
            return Ok(None);
        };
        let Some(node) = frame.node.clone() else {
            return Ok(None);
        };
        let header = frame.header.clone();

        if self.pending.is_empty() {
            let window = &input[..input.len().min(content_len(&header))];
            return match node.encoding().decode_with_header(&header, window)? {
                Partial::Done(b, used) => {
                    check_consumed(&header, used, window.len())?;
                    self.finish_fields(b, &window[..used]);
                    Ok(Some(used))
                }
                Partial::Needed(n) => {
                    self.check_fields_room(&header, n, window.len())?;
                    self.buffer(window, n);
                    Ok(None)
                }
            };
        }

        let Some(take) = self.fill_pending(input) else {
            return Ok(None);
        };
        let buf = mem::take(&mut self.pending);
        match node.encoding().decode_with_header(&header, &buf)? {
            Partial::Done(b, used) => {
                check_consumed(&header, used, buf.len())?;
                self.finish_fields(b, &buf[..used]);
                self.finish_pending(buf, used)?;
            }
            Partial::Needed(n) => {
                self.check_fields_room(&header, n, buf.len())?;
                self.pending = buf;
                self.needed = n;
            }
        }
        Ok(Some(take))
    }

    fn step_payload(&mut self, input: &[u8]) -> Option<usize> {
        if input.is_empty() {
            return None;
        }
        let Mp4Parser { stack, handler, .. } = self;
        let frame = stack.last_mut()?;
        let n = usize::try_from(frame.remaining()).unwrap_or(usize::MAX).min(input.len());
        handler.on_box_data(&frame.header, &input[..n]);
        frame.consumed += n as u64;
        Some(n)
    }

    /// Pops every box whose bytes are all accounted for, innermost first.
    fn close_completed(&mut self) -> Result<()> {
        while let Some(top) = self.stack.last() {
            if top.mode == Mode::Fields || top.consumed < top.header.size {
                return Ok(());
            }
            let Some(frame) = self.stack.pop() else {
                return Ok(());
            };
            if frame.consumed > frame.header.size {
                return Err(Error::SizeMismatch {
                    box_type: frame.header.typ,
                    declared: frame.header.size,
                    actual: frame.consumed,
                });
            }
            self.handler.on_box_ended(&frame.header, frame.decoded.as_ref());

            match self.stack.last_mut() {
                Some(parent) => {
                    parent.consumed += frame.header.size;
                    if let (Some(p), Some(child)) = (parent.decoded.as_mut(), frame.decoded) {
                        p.attach(child);
                    }
                }
                None => {
                    log::debug!(
                        "top-level box '{}' ({} bytes) complete",
                        frame.header.typ,
                        frame.header.size
                    );
                    if let Some(b) = frame.decoded {
                        self.handler.on_top_level_box(b);
                    }
                }
            }
        }
        Ok(())
    }

    fn start_box(&mut self, header: BoxHeader, raw: &[u8]) -> Result<()> {
        if let Some(parent) = self.stack.last() {
            if header.size > parent.remaining() {
                return Err(Error::SizeMismatch {
                    box_type: parent.header.typ,
                    declared: parent.header.size,
                    actual: parent.consumed + header.size,
                });
            }
        }
        if self.stack.len() >= self.options.max_depth {
            return Err(Error::DepthExceeded { max_depth: self.options.max_depth });
        }

        let decode = self.handler.on_box_started(&header, raw);
        let node = if decode { self.lookup(header.typ) } else { None };
        let mode = if node.is_some() { Mode::Fields } else { Mode::Payload };
        log::trace!(
            "start '{}' size={} depth={} {:?}",
            header.typ,
            header.size,
            self.stack.len(),
            mode
        );
        self.stack.push(Frame {
            header,
            node,
            decoded: None,
            consumed: raw.len() as u64,
            mode,
        });
        Ok(())
    }

    /// The encoding for a box of type `typ` opening at the current position.
    /// Inside a decoded box only the children of its encoding are legal;
    /// anything else passes through.
    fn lookup(&self, typ: FourCC) -> Option<Arc<EncodingNode>> {
        match self.stack.last().and_then(|parent| parent.node.as_ref()) {
            Some(node) => node.child(typ).cloned(),
            None => self.registry.get(typ).cloned(),
        }
    }

    fn finish_fields(&mut self, b: Mp4Box, raw: &[u8]) {
        let traverse = self.handler.on_box_decoded(&b, raw);
        let Some(frame) = self.stack.last_mut() else {
            return;
        };
        frame.consumed += raw.len() as u64;
        frame.mode = if traverse && b.is_container() { Mode::Children } else { Mode::Payload };
        log::trace!("decoded '{}' fields={} {:?}", b.header.typ, raw.len(), frame.mode);
        frame.decoded = Some(b);
    }

    /// Keeps `bytes` until `needed` bytes are available.
    fn buffer(&mut self, bytes: &[u8], needed: usize) {
        self.pending.extend_from_slice(bytes);
        self.needed = needed;
    }

    /// Tops up `pending` from `input`. Returns the bytes taken once `pending`
    /// is complete, None if `input` ran out first.
    fn fill_pending(&mut self, input: &[u8]) -> Option<usize> {
        let take = (self.needed - self.pending.len()).min(input.len());
        self.pending.extend_from_slice(&input[..take]);
        (self.pending.len() >= self.needed).then_some(take)
    }

    /// Returns the emptied buffer for reuse and parses any bytes the decoder
    /// did not consume.
    fn finish_pending(&mut self, mut buf: Vec<u8>, used: usize) -> Result<()> {
        let leftover = buf.split_off(used);
        buf.clear();
        self.pending = buf;
        self.needed = 0;
        if leftover.is_empty() {
            return Ok(());
        }
        self.feed(&leftover)
    }

    fn check_header_room(&self, needed: usize, available: &[u8]) -> Result<()> {
        let box_type =
            FourCC::from_slice(available.get(4..).unwrap_or_default()).unwrap_or_default();
        if needed <= available.len() {
            return Err(Error::NoProgress { box_type, needed, available: available.len() });
        }
        match self.stack.last() {
            Some(parent) if needed as u64 > parent.remaining() => Err(Error::SizeMismatch {
                box_type: parent.header.typ,
                declared: parent.header.size,
                actual: parent.consumed + needed as u64,
            }),
            _ => Ok(()),
        }
    }

    fn check_fields_room(&self, header: &BoxHeader, needed: usize, available: usize) -> Result<()> {
        if needed <= available {
            return Err(Error::NoProgress { box_type: header.typ, needed, available });
        }
        if needed as u64 > header.content_length() {
            return Err(Error::SizeMismatch {
                box_type: header.typ,
                declared: header.size,
                actual: header.header_length() as u64 + needed as u64,
            });
        }
        if needed > self.options.max_field_bytes {
            return Err(Error::FieldsTooLarge {
                box_type: header.typ,
                needed,
                limit: self.options.max_field_bytes,
            });
        }
        Ok(())
    }
}

fn check_consumed(header: &BoxHeader, used: usize, available: usize) -> Result<()> {
    if used > available {
        return Err(Error::SizeMismatch {
            box_type: header.typ,
            declared: header.size,
            actual: header.header_length() as u64 + used as u64,
        });
    }
    Ok(())
}

impl<H: ParserHandler + Default> Default for Mp4Parser<H> {
    fn default() -> Self {
        Self::new(H::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events(Vec<String>);

    impl ParserHandler for Events {
        fn on_box_started(&mut self, header: &BoxHeader, _raw: &[u8]) -> bool {
            self.0.push(format!("start {}", header.typ));
            true
        }

        fn on_box_data(&mut self, header: &BoxHeader, data: &[u8]) {
            self.0.push(format!("data {} {}", header.typ, data.len()));
        }

        fn on_box_ended(&mut self, header: &BoxHeader, _b: Option<&Mp4Box>) {
            self.0.push(format!("end {}", header.typ));
        }
    }

    #[test]
    fn empty_box_starts_and_ends() {
        let mut p = Mp4Parser::new(Events::default());
        p.append(&[0, 0, 0, 8, b'm', b'o', b'o', b'f']).unwrap();
        assert_eq!(p.handler().0, ["start moof", "end moof"]);
        assert_eq!(p.state(), ParserState::AwaitingHeader);
        assert!(p.is_idle());
    }

    #[test]
    fn strict_options_reject_empty_box() {
        let mut p =
            Mp4Parser::new(()).with_options(ParserOptions::default().allow_empty_boxes(false));
        let err = p.append(&[0, 0, 0, 8, b'm', b'o', b'o', b'f']).unwrap_err();
        assert!(matches!(err, Error::EmptyBoxUnsupported { .. }));
        assert!(matches!(p.append(&[0]), Err(Error::ParserFailed)));
    }

    #[test]
    fn payload_split_across_appends() {
        let mut p = Mp4Parser::new(Events::default());
        p.append(&[0, 0, 0, 12, b'f', b'r']).unwrap();
        assert_eq!(p.state(), ParserState::AwaitingHeader);
        p.append(&[b'e', b'e', 1, 2]).unwrap();
        assert_eq!(p.state(), ParserState::PassthroughPayload(FourCC(*b"free")));
        p.append(&[3, 4]).unwrap();
        assert_eq!(p.handler().0, ["start free", "data free 2", "data free 2", "end free"]);
        assert_eq!(p.bytes_received(), 12);
    }

    #[test]
    fn indefinite_size_is_fatal() {
        let mut p = Mp4Parser::new(());
        assert!(matches!(
            p.append(&[0, 0, 0, 0, b'm', b'd', b'a', b't']),
            Err(Error::UnsupportedIndefiniteSize { .. })
        ));
    }
}
