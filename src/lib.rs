pub mod boxes;
pub mod boxes_file;
pub mod boxes_moof;
pub mod boxes_moov;
pub mod boxes_sample_entry;
pub mod encoding;
pub mod error;
pub mod known_boxes;
pub mod parser;
pub mod registry;
pub mod util;

pub use boxes::{
    BoxBody, BoxContainer, BoxHeader, FourCC, FullBoxHeader, HeaderRules, Mp4Box, parse_box_header,
    parse_box_header_with, parse_full_box_header,
};
pub use encoding::{BoxEncoding, EncodingNode, Partial};
pub use error::{Error, Result};
pub use known_boxes::KnownBox;
pub use parser::{Mp4Parser, ParserHandler, ParserOptions, ParserState};
pub use registry::{Registry, default_registry};
