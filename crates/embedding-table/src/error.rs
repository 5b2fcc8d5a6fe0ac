//! Error types shared by every module of the embedding table.

use std::io;

use thiserror::Error;

/// Errors produced while building, querying, or persisting an embedding table.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Construction options contradict each other (e.g. two fallthrough sources).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("the provided item was not found")]
    ItemNotFound,

    #[error("slot 0 is reserved for the fallthrough but no fallthrough is configured")]
    UndefinedFallthrough,

    #[error("invalid parameter name: {0}")]
    InvalidParameterName(String),

    /// Persisted bytes could not be decoded into a valid table.
    #[error("malformed embedding data: {0}")]
    Malformed(String),

    #[error("slot {slot} is out of range for a table with {num_items} slots")]
    SlotOutOfRange { slot: i64, num_items: usize },

    #[error("slot space exhausted after {0} slots")]
    SlotsExhausted(usize),

    #[error("item codec error: {0}")]
    ItemCodec(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EmbeddingError {
    /// Shorthand for [`EmbeddingError::Malformed`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Classify an I/O failure hit while decoding a payload.
    ///
    /// Running out of bytes means the payload is truncated, which is a data
    /// problem rather than an I/O problem.
    pub(crate) fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Malformed(format!("truncated while reading {what}"))
        } else {
            Self::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
