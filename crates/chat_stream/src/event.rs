//! Decoded events and per-record parsing.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::framing::{Format, Framing};

/// One Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Duration>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Deserialize the `data` field as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// One part of a custom-framed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Present when the framing has a key/value separator and the part contains it.
    pub name: Option<String>,
    pub value: String,
}

/// One decoded unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StreamEvent {
    Sse(SseEvent),
    Json(serde_json::Value),
    Record(Vec<Field>),
}

impl StreamEvent {
    pub fn as_sse(&self) -> Option<&SseEvent> {
        match self {
            Self::Sse(event) => Some(event),
            _ => None,
        }
    }

    /// Event id usable for stream resumption.
    pub fn last_event_id(&self) -> Option<&str> {
        match self {
            Self::Sse(event) => event.id.as_deref(),
            _ => None,
        }
    }

    /// Best-effort textual content: SSE data, a JSON string, or the first field value.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Sse(event) => Some(&event.data),
            Self::Json(value) => value.as_str(),
            Self::Record(fields) => fields.first().map(|field| field.value.as_str()),
        }
    }
}

/// Parse one complete record. `None` means the record carries nothing
/// (blank line, comment-only SSE block).
pub fn parse_record(framing: &Framing, raw: &[u8]) -> Option<Result<StreamEvent, DecodeError>> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(err) => return Some(Err(DecodeError::Utf8(err.to_string()))),
    };

    match framing.format {
        Format::Sse => parse_sse(framing, text).map(|event| Ok(StreamEvent::Sse(event))),
        Format::NdJson => parse_json_line(text),
        Format::Custom => parse_custom(framing, text).map(|fields| Ok(StreamEvent::Record(fields))),
    }
}

fn split_parts<'a>(separator: Option<&'a str>, text: &'a str) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    match separator {
        Some(separator) if !separator.is_empty() => Box::new(text.split(separator)),
        _ => Box::new(std::iter::once(text)),
    }
}

fn parse_sse(framing: &Framing, text: &str) -> Option<SseEvent> {
    let kv = framing.key_value_separator.as_deref().unwrap_or(":");
    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut seen_field = false;

    for line in split_parts(framing.part_separator.as_deref(), text) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(kv) {
            // blank or comment
            continue;
        }

        let (name, value) = match line.split_once(kv) {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match name {
            "event" => {
                event.event = Some(value.to_string());
                seen_field = true;
            }
            "data" => {
                data_lines.push(value);
                seen_field = true;
            }
            "id" => {
                if !value.contains('\0') {
                    event.id = Some(value.to_string());
                    seen_field = true;
                }
            }
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    event.retry = Some(Duration::from_millis(ms));
                    seen_field = true;
                }
            }
            other => log::debug!("Ignoring unknown SSE field {other:?}"),
        }
    }

    if !seen_field {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

fn parse_json_line(text: &str) -> Option<Result<StreamEvent, DecodeError>> {
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(line)
            .map(StreamEvent::Json)
            .map_err(|err| DecodeError::Json {
                record: line.to_string(),
                message: err.to_string(),
            }),
    )
}

fn parse_custom(framing: &Framing, text: &str) -> Option<Vec<Field>> {
    let fields: Vec<Field> = split_parts(framing.part_separator.as_deref(), text)
        .map(|part| part.strip_suffix('\r').unwrap_or(part))
        .filter(|part| !part.is_empty())
        .map(|part| match framing.key_value_separator.as_deref() {
            Some(kv) if !kv.is_empty() => match part.split_once(kv) {
                Some((name, value)) => Field {
                    name: Some(name.trim().to_string()),
                    value: value.trim_start().to_string(),
                },
                None => Field {
                    name: None,
                    value: part.to_string(),
                },
            },
            _ => Field {
                name: None,
                value: part.to_string(),
            },
        })
        .collect();

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}
