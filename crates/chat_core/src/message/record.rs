use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{MessageId, MessageStatus};

/// One message of a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageRecord<M> {
    pub id: MessageId,
    /// Caller-defined content.
    pub payload: M,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<Map<String, Value>>,
}

impl<M> MessageRecord<M> {
    pub fn new(id: impl Into<MessageId>, payload: M, status: MessageStatus) -> Self {
        Self {
            id: id.into(),
            payload,
            status,
            extra_info: None,
        }
    }

    /// Create a record with a freshly generated id.
    pub fn with_generated_id(payload: M, status: MessageStatus) -> Self {
        Self::new(MessageId::next(), payload, status)
    }

    pub fn with_extra_info(mut self, extra_info: Map<String, Value>) -> Self {
        self.extra_info = Some(extra_info);
        self
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: MessagePatch<M>) {
        if let Some(payload) = patch.payload {
            self.payload = payload;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(extra_info) = patch.extra_info {
            self.extra_info = Some(extra_info);
        }
    }
}

/// Partial update of a message; `None` fields are left untouched.
#[derive(Clone, Debug)]
pub struct MessagePatch<M> {
    pub payload: Option<M>,
    pub status: Option<MessageStatus>,
    pub extra_info: Option<Map<String, Value>>,
}

impl<M> Default for MessagePatch<M> {
    fn default() -> Self {
        Self {
            payload: None,
            status: None,
            extra_info: None,
        }
    }
}

impl<M> MessagePatch<M> {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn payload(payload: M, status: MessageStatus) -> Self {
        Self {
            payload: Some(payload),
            status: Some(status),
            ..Self::default()
        }
    }
}
