//! Per-response body handling, resolved once from the response headers.

use chat_stream::{Framing, StreamTransform, TransformSelector};
use reqwest::header::{HeaderMap, CONTENT_TYPE};

use crate::error::{RequestError, Result};

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";
const NDJSON_TYPES: [&str; 3] = ["application/x-ndjson", "application/ndjson", "application/jsonl"];

/// How a response body is consumed.
pub enum ResponseKind {
    /// Server-Sent Events.
    EventStream,
    /// One JSON document.
    Json,
    /// Stream decoding with caller-configured (or NDJSON) framing.
    Framed {
        framing: Framing,
        transform: Option<Box<dyn StreamTransform>>,
    },
}

impl std::fmt::Debug for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventStream => f.write_str("EventStream"),
            Self::Json => f.write_str("Json"),
            Self::Framed { framing, transform } => f
                .debug_struct("Framed")
                .field("framing", framing)
                .field("transform", &transform.is_some())
                .finish(),
        }
    }
}

/// Media type without parameters, lowercased.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
}

impl ResponseKind {
    /// Configured framing or transform wins over content-type inspection.
    pub fn resolve(
        headers: &HeaderMap,
        framing: Option<&Framing>,
        selector: Option<&TransformSelector>,
    ) -> Result<Self> {
        let media = media_type(headers);
        let transform = selector.and_then(|select| select(headers));

        if framing.is_some() || transform.is_some() {
            let framing = framing.cloned().unwrap_or_else(|| match media.as_deref() {
                Some(m) if NDJSON_TYPES.contains(&m) => Framing::ndjson(),
                _ => Framing::sse(),
            });
            return Ok(Self::Framed { framing, transform });
        }

        match media.as_deref() {
            Some(EVENT_STREAM) => Ok(Self::EventStream),
            Some(JSON) => Ok(Self::Json),
            Some(m) if NDJSON_TYPES.contains(&m) => Ok(Self::Framed {
                framing: Framing::ndjson(),
                transform: None,
            }),
            other => Err(RequestError::UnsupportedContentType(
                other.unwrap_or("<missing>").to_string(),
            )),
        }
    }
}
