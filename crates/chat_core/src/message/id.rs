use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a message within a conversation.
///
/// Callers may bring their own string or numeric ids (for example from a
/// history loader); ids generated by the engine are strings of the form
/// `msg_<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Num(u64),
    Str(String),
}

impl MessageId {
    /// Generate an id that is unique for the lifetime of the process.
    pub fn next() -> Self {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self::Str(format!("msg_{n}"))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self::Num(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = MessageId::next();
        let b = MessageId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("msg_"));
    }

    #[test]
    fn string_and_numeric_ids_serialize_untagged() {
        assert_eq!(serde_json::to_string(&MessageId::from(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&MessageId::from("a")).unwrap(),
            "\"a\""
        );
        let parsed: MessageId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, MessageId::Num(42));
    }
}
