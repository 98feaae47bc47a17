//! chat_state - Message store and chat orchestration
//!
//! This crate owns the message-level side of a conversation:
//! - `store` - observable, throttled container of message records
//! - `context` - registry of stores and in-flight flags per conversation
//! - `orchestrator` - turns user input into streamed reply messages

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod throttle;

// Re-export commonly used types
pub use context::ChatContext;
pub use error::{ChatError, Result};
pub use orchestrator::{
    ChatOrchestrator, ChatOrchestratorBuilder, ChatProvider, Fallback, FallbackContext,
    MergeContext, MessageTransform, Placeholder, RequestCodec,
};
pub use store::{Listener, MessageStore, Subscription};
pub use throttle::{Throttle, ThrottleState, THROTTLE_WINDOW};
