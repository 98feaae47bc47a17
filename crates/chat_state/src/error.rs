use chat_core::{ConversationKey, MessageId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("No chat provider configured")]
    MissingProvider,

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("A request is already in flight for this conversation")]
    RequestInFlight,

    #[error("Chat providers need a manual request controller")]
    ProviderNotManual,

    #[error("Conversation {0} is registered with a different message type")]
    StoreTypeMismatch(ConversationKey),
}

pub type Result<T> = std::result::Result<T, ChatError>;
