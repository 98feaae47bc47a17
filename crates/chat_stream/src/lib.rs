//! chat_stream - incremental decoding of streamed model responses
//!
//! Raw body bytes are split into records by a [`Framing`], optionally after
//! passing through a caller-supplied [`StreamTransform`], and surfaced as a
//! lazy [`StreamDecoder`] of [`StreamEvent`]s.

pub mod decoder;
pub mod error;
pub mod event;
pub mod framing;
pub mod response;
pub mod transform;

pub use decoder::StreamDecoder;
pub use error::DecodeError;
pub use event::{Field, SseEvent, StreamEvent};
pub use framing::{Format, FrameBuffer, Framing, LineEndings};
pub use response::{ResponseBytes, ResponseDecodeExt};
pub use transform::{StreamTransform, TransformSelector};
