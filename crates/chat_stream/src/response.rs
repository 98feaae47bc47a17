//! `reqwest::Response` extension.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::decoder::StreamDecoder;
use crate::framing::Framing;

/// Boxed body stream of a `reqwest::Response`.
pub type ResponseBytes = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

pub trait ResponseDecodeExt {
    /// Decode the response body with the given framing.
    fn decode(self, framing: Framing) -> StreamDecoder<ResponseBytes>;

    /// Decode the response body as Server-Sent Events.
    fn events(self) -> StreamDecoder<ResponseBytes>
    where
        Self: Sized,
    {
        self.decode(Framing::sse())
    }
}

impl ResponseDecodeExt for reqwest::Response {
    fn decode(self, framing: Framing) -> StreamDecoder<ResponseBytes> {
        StreamDecoder::new(Box::pin(self.bytes_stream()), framing)
    }
}
