//! chat_core - Core types for the streaming chat engine
//!
//! This crate provides the foundational types used across all chat-related crates:
//! - `message` - MessageId, MessageStatus, MessageRecord and patches
//! - `conversation` - ConversationKey scoping one store and one in-flight flag
//! - `config` - file/env configuration for request defaults

pub mod config;
pub mod conversation;
pub mod message;
pub mod paths;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use conversation::ConversationKey;
pub use message::{MessageId, MessagePatch, MessageRecord, MessageStatus, TransitionError};
