//! Error types for the MIDI-CI data model and codec.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    #[error("Invalid MUID: {0:#x}")]
    InvalidMuid(u32),

    #[error("Field too long: {len} bytes (max {max})")]
    FieldTooLong { len: usize, max: usize },

    #[error("Text is not valid 7-bit escaped text")]
    InvalidText,

    #[error("Data contains bytes with the high bit set")]
    NonSevenBitData,

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
