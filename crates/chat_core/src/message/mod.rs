//! Message records and their lifecycle.

mod id;
mod record;
mod status;

pub use id::MessageId;
pub use record::{MessagePatch, MessageRecord};
pub use status::{MessageStatus, TransitionError};
