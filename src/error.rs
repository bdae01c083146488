//! Centralized error type for the midi-ci umbrella crate.
//!
//! Wraps the codec and engine errors so `?` propagates across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] midi_ci_core::Error),

    #[cfg(feature = "host")]
    #[error(transparent)]
    Host(#[from] midi_ci_host::Error),

    #[cfg(feature = "host")]
    #[error("Chunking: {0}")]
    Chunk(#[from] midi_ci_host::ChunkError),
}

pub type Result<T> = std::result::Result<T, Error>;
