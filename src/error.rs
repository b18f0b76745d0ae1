//! Error types for embedding table operations.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid model: {0}")]
    Invalid(String),
}

impl EmbedError {
    /// Create a decode error (malformed serialized model).
    pub fn decode(msg: impl Into<String>) -> Self {
        EmbedError::Decode(msg.into())
    }

    /// Create an invalid-model error (bad construction parameters).
    pub fn invalid(msg: impl Into<String>) -> Self {
        EmbedError::Invalid(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EmbedError>;
