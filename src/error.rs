use crate::boxes::FourCC;

/// Fatal parse, registration and encode failures.
///
/// Running out of input is never reported here: decoders signal it with
/// [`Partial::Needed`](crate::encoding::Partial::Needed) and the streaming
/// parser retries once more bytes arrive.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("box '{box_type}' has size 0 (extends to end of stream), which cannot be bounded")]
    UnsupportedIndefiniteSize { box_type: FourCC },

    #[error("box '{box_type}' has largesize {largesize}, above the supported maximum {max}")]
    SizeOverflow {
        box_type: FourCC,
        largesize: u64,
        max: u64,
    },

    #[error("box '{box_type}' has invalid size {size}")]
    InvalidBoxSize { box_type: FourCC, size: u64 },

    #[error("box '{box_type}' has no payload")]
    EmptyBoxUnsupported { box_type: FourCC },

    #[error("unsupported version {version} of '{box_type}' box")]
    UnsupportedVersion { box_type: FourCC, version: u8 },

    #[error("invalid flags 0x{flags:06x} in '{box_type}' box: {reason}")]
    InvalidFlags {
        box_type: FourCC,
        flags: u32,
        reason: &'static str,
    },

    #[error("box '{box_type}' declares {declared} bytes but {actual} were accounted for")]
    SizeMismatch {
        box_type: FourCC,
        declared: u64,
        actual: u64,
    },

    #[error("box type is already registered: {0}")]
    DuplicateRegistration(FourCC),

    #[error("'{child}' is already registered as a child of '{parent}'")]
    DuplicateChildEncoding { parent: FourCC, child: FourCC },

    #[error("expected '{expected}' box, found '{actual}'")]
    UnexpectedBoxType { expected: FourCC, actual: FourCC },

    #[error("decoder for '{box_type}' asked for {needed} bytes with {available} already available")]
    NoProgress {
        box_type: FourCC,
        needed: usize,
        available: usize,
    },

    #[error("box nesting deeper than {max_depth} levels")]
    DepthExceeded { max_depth: usize },

    #[error("fields of '{box_type}' need {needed} bytes, above the {limit} byte limit")]
    FieldsTooLarge {
        box_type: FourCC,
        needed: usize,
        limit: usize,
    },

    #[error("64-bit value {value} in '{box_type}' exceeds the supported maximum")]
    ValueOverflow { box_type: FourCC, value: u64 },

    #[error("{field} = {value} in '{box_type}' does not fit the field width of this version")]
    FieldOutOfRange {
        box_type: FourCC,
        field: &'static str,
        value: i64,
    },

    #[error("encoding '{0}' boxes is not supported")]
    EncodeUnsupported(FourCC),

    #[error("box '{box_type}' does not carry the fields its encoding expects")]
    BodyMismatch { box_type: FourCC },

    #[error("encoding_length {expected} and encode_to ({short} short) disagree for '{box_type}'")]
    EncodingLengthMismatch {
        box_type: FourCC,
        expected: usize,
        short: usize,
    },

    #[error("'{parent}' has no '{child}' child")]
    MissingBox { parent: FourCC, child: FourCC },

    #[error("parser already failed; further input is rejected")]
    ParserFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
