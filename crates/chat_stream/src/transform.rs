//! Byte-level transforms applied before framing.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::DecodeError;

/// Rewrites raw body bytes before they reach the framer.
///
/// Any failure is fatal to the decode.
pub trait StreamTransform: Send {
    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, DecodeError>;

    /// Called once when the source ends; returns any buffered output.
    fn finish(&mut self) -> Result<Bytes, DecodeError> {
        Ok(Bytes::new())
    }
}

impl<F> StreamTransform for F
where
    F: FnMut(Bytes) -> Result<Bytes, String> + Send,
{
    fn transform(&mut self, chunk: Bytes) -> Result<Bytes, DecodeError> {
        self(chunk).map_err(DecodeError::Transform)
    }
}

/// Picks a transform for one response, given its headers.
///
/// Returning `None` decodes the body untransformed.
pub type TransformSelector =
    Arc<dyn Fn(&HeaderMap) -> Option<Box<dyn StreamTransform>> + Send + Sync>;
