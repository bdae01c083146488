//! Error types for the MIDI-CI protocol engine.

use midi_ci_core::Muid;
use thiserror::Error;

/// Failure to set up a chunk sequence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Header of {header_len} bytes does not fit in a {chunk_size}-byte chunk")]
    HeaderTooLarge { chunk_size: usize, header_len: usize },

    #[error("Body needs {0} chunks, more than a chunk index can count")]
    TooManyChunks(usize),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel count {0} exceeds 256")]
    TooManyChannels(i32),

    #[error("Unknown device: {0}")]
    UnknownDevice(Muid),

    #[error("No subscription with id {0:?}")]
    UnknownSubscription(String),

    #[error("Subscription update names a different resource")]
    ResourceMismatch,

    #[error("Subscriptions cannot be started with an update")]
    CannotStartSubscription,

    #[error("Too many property exchange transactions in flight")]
    TooManyTransactions,

    #[error("Encoding: {0}")]
    Encoding(#[from] midi_ci_core::Error),

    #[error("Chunking: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
