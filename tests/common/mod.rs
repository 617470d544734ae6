#![allow(dead_code)]

use isomp4::{BoxHeader, Mp4Box, ParserHandler};

/// A compact-header box around `content`.
pub fn boxed(typ: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + content.len());
    v.extend_from_slice(&(8 + content.len() as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(content);
    v
}

/// A full box: version and 24-bit flags, then `content`.
pub fn full_boxed(typ: &[u8; 4], version: u8, flags: u32, content: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.extend_from_slice(&flags.to_be_bytes()[1..]);
    body.extend_from_slice(content);
    boxed(typ, &body)
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

/// Fragment from a real stream: moof(mfhd, traf(tfhd, tfdt, trun)), 96 bytes.
pub const MOOF_DATA: &[u8] = &[
    0x00, 0x00, 0x00, 0x60, b'm', b'o', b'o', b'f', // moof, 96
    0x00, 0x00, 0x00, 0x10, b'm', b'f', b'h', b'd', // mfhd, 16
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x4D, 0x05, // v0, sequence 19717
    0x00, 0x00, 0x00, 0x48, b't', b'r', b'a', b'f', // traf, 72
    0x00, 0x00, 0x00, 0x1C, b't', b'f', b'h', b'd', // tfhd, 28
    0x00, 0x00, 0x00, 0x38, 0x00, 0x00, 0x00, 0x01, // default duration/size/flags, track 1
    0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x03, 0xE4, // duration 100, size 996
    0x00, 0x01, 0x00, 0xC0, // default sample flags
    0x00, 0x00, 0x00, 0x10, b't', b'f', b'd', b't', // tfdt, 16
    0x00, 0x00, 0x00, 0x00, 0x00, 0x1E, 0x15, 0x90, // v0, decode time 1971600
    0x00, 0x00, 0x00, 0x14, b't', b'r', b'u', b'n', // trun, 20
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // data offset present, 1 sample
    0x00, 0x00, 0x00, 0x68, // data offset 104
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String, u64),
    Decoded(String, usize),
    Data(String, Vec<u8>),
    Ended(String, bool),
}

/// Records every callback, merging consecutive data events for the same box
/// so that recordings do not depend on chunking.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    /// Every byte seen by the callbacks, in order.
    pub bytes: Vec<u8>,
    pub top_level: Vec<Mp4Box>,
    /// Types whose fields should not be decoded.
    pub skip_fields: Vec<&'static str>,
    /// Types whose children should not be traversed.
    pub skip_children: Vec<&'static str>,
    /// Open boxes: type, declared size, bytes seen so far.
    open: Vec<(String, u64, u64)>,
    /// Closed boxes in end order: type, declared size, bytes seen.
    pub totals: Vec<(String, u64, u64)>,
}

impl Recorder {
    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Started(t, _) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn ended(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Ended(t, _) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Recorder {
    fn count(&mut self, n: u64) {
        if let Some(top) = self.open.last_mut() {
            top.2 += n;
        }
    }
}

impl ParserHandler for Recorder {
    fn on_box_started(&mut self, header: &BoxHeader, raw_header: &[u8]) -> bool {
        let typ = header.typ.to_string();
        self.bytes.extend_from_slice(raw_header);
        let decode = !self.skip_fields.contains(&typ.as_str());
        self.open.push((typ.clone(), header.size, raw_header.len() as u64));
        self.events.push(Event::Started(typ, header.size));
        decode
    }

    fn on_box_decoded(&mut self, b: &Mp4Box, raw_fields: &[u8]) -> bool {
        let typ = b.box_type().to_string();
        self.bytes.extend_from_slice(raw_fields);
        let traverse = !self.skip_children.contains(&typ.as_str());
        self.count(raw_fields.len() as u64);
        self.events.push(Event::Decoded(typ, raw_fields.len()));
        traverse
    }

    fn on_box_data(&mut self, header: &BoxHeader, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        self.count(data.len() as u64);
        let typ = header.typ.to_string();
        if let Some(Event::Data(t, d)) = self.events.last_mut() {
            if *t == typ {
                d.extend_from_slice(data);
                return;
            }
        }
        self.events.push(Event::Data(typ, data.to_vec()));
    }

    fn on_box_ended(&mut self, header: &BoxHeader, b: Option<&Mp4Box>) {
        self.events.push(Event::Ended(header.typ.to_string(), b.is_some()));
        if let Some(closed) = self.open.pop() {
            self.count(closed.1);
            self.totals.push(closed);
        }
    }

    fn on_top_level_box(&mut self, b: Mp4Box) {
        self.top_level.push(b);
    }
}
