//! OpenAI-style chat completion body and delta merging.

use chat_core::{MessageRecord, MessageStatus};
use chat_state::{MergeContext, MessageTransform, RequestCodec};
use chat_stream::StreamEvent;
use serde_json::{json, Value};

const DONE: &str = "[DONE]";

/// Encodes the visible history as `{"messages": [...], "stream": true}`.
pub struct CompletionCodec {
    pub model: Option<String>,
}

impl RequestCodec<String, String> for CompletionCodec {
    fn encode(&self, _input: &String, history: &[MessageRecord<String>]) -> Value {
        let messages: Vec<Value> = history
            .iter()
            .filter(|m| matches!(m.status, MessageStatus::Local | MessageStatus::Success))
            .map(|m| {
                let role = if m.status == MessageStatus::Local {
                    "user"
                } else {
                    "assistant"
                };
                json!({"role": role, "content": m.payload})
            })
            .collect();

        let mut body = json!({"messages": messages, "stream": true});
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        body
    }
}

/// Appends `choices[0].delta.content` of each chunk to the reply.
pub struct DeltaTransform;

fn delta_text(chunk: &StreamEvent) -> String {
    match chunk {
        StreamEvent::Sse(event) => {
            let data = event.data.trim();
            if data == DONE {
                return String::new();
            }
            match serde_json::from_str::<Value>(data) {
                Ok(value) => content_of(&value),
                Err(_) => event.data.clone(),
            }
        }
        StreamEvent::Json(value) => content_of(value),
        StreamEvent::Record(_) => chunk.text().unwrap_or_default().to_string(),
    }
}

fn content_of(value: &Value) -> String {
    let choice = &value["choices"][0];
    choice["delta"]["content"]
        .as_str()
        .or_else(|| choice["message"]["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

impl MessageTransform<String, String> for DeltaTransform {
    fn local_message(&self, input: &String) -> String {
        input.clone()
    }

    fn merge(&self, context: MergeContext<'_, String>) -> String {
        match context.chunk {
            Some(chunk) => {
                let mut text = context.origin.cloned().unwrap_or_default();
                text.push_str(&delta_text(chunk));
                text
            }
            None => context.chunks.iter().map(delta_text).collect(),
        }
    }
}
