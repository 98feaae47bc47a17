use thiserror::Error;

/// Error raised while decoding a byte stream.
///
/// Only [`DecodeError::Transform`] and [`DecodeError::Source`] are fatal;
/// the others affect a single record and decoding continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Record is not valid UTF-8: {0}")]
    Utf8(String),

    #[error("Invalid JSON record {record:?}: {message}")]
    Json { record: String, message: String },

    #[error("Stream transform failed: {0}")]
    Transform(String),

    #[error("Byte source failed: {0}")]
    Source(String),
}

impl DecodeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transform(_) | Self::Source(_))
    }
}
