//! chat_request - one outstanding HTTP exchange with a model backend
//!
//! [`RequestController`] issues a POST, races it against a timeout, routes
//! the body to the stream decoder or a JSON handler, guards stream idle
//! time, and retries with a fixed or caller-chosen back-off. Results are
//! reported through [`RequestCallbacks`].

pub mod callbacks;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod transport;

#[cfg(feature = "test-util")]
pub mod testing;

pub use callbacks::{ChannelCallbacks, RequestCallbacks, RequestEvent};
pub use controller::{CallOptions, RequestController, RunHandle};
pub use dispatch::ResponseKind;
pub use error::{RequestError, Result};
pub use options::{request_defaults, set_request_defaults, RequestDefaults, RequestOptions};
pub use transport::{ByteStream, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

pub use chat_stream::{Framing, StreamEvent};
pub use reqwest::header::HeaderMap;
