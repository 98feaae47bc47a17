//! Notification surface of a run.

use std::time::Duration;

use chat_stream::StreamEvent;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;

use crate::error::RequestError;

/// Receives the outcome of a run, in decode order.
///
/// `on_success` is always the last notification of a successful attempt.
/// After `abort()` the only notification delivered is the cancellation
/// error itself. A run replaced by a newer one gets `on_superseded` and
/// nothing else.
pub trait RequestCallbacks: Send + Sync {
    fn on_update(&self, _chunk: &StreamEvent, _headers: &HeaderMap) {}

    fn on_success(&self, _chunks: &[StreamEvent], _headers: &HeaderMap) {}

    /// Returning a non-zero delay asks for a retry after that delay.
    fn on_error(&self, _error: &RequestError, _headers: Option<&HeaderMap>) -> Option<Duration> {
        None
    }

    /// Called before waiting `delay` for retry number `attempt`.
    /// Returning `false` gives up and leaves the last error terminal.
    fn on_retry(&self, _attempt: u32, _delay: Duration) -> bool {
        true
    }

    fn on_superseded(&self) {}
}

/// Run notifications as values.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    Update {
        chunk: StreamEvent,
        headers: HeaderMap,
    },
    Success {
        chunks: Vec<StreamEvent>,
        headers: HeaderMap,
    },
    Error {
        error: RequestError,
        headers: Option<HeaderMap>,
    },
    Retry {
        attempt: u32,
        delay: Duration,
    },
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<RequestEvent>,
    retry_hint: Option<Duration>,
}

impl ChannelCallbacks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                retry_hint: None,
            },
            rx,
        )
    }

    /// Answer every error with this retry delay.
    pub fn with_retry_hint(mut self, delay: Duration) -> Self {
        self.retry_hint = Some(delay);
        self
    }

    fn send(&self, event: RequestEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Request event receiver dropped");
        }
    }
}

impl RequestCallbacks for ChannelCallbacks {
    fn on_update(&self, chunk: &StreamEvent, headers: &HeaderMap) {
        self.send(RequestEvent::Update {
            chunk: chunk.clone(),
            headers: headers.clone(),
        });
    }

    fn on_success(&self, chunks: &[StreamEvent], headers: &HeaderMap) {
        self.send(RequestEvent::Success {
            chunks: chunks.to_vec(),
            headers: headers.clone(),
        });
    }

    fn on_error(&self, error: &RequestError, headers: Option<&HeaderMap>) -> Option<Duration> {
        self.send(RequestEvent::Error {
            error: error.clone(),
            headers: headers.cloned(),
        });
        self.retry_hint
    }

    fn on_retry(&self, attempt: u32, delay: Duration) -> bool {
        self.send(RequestEvent::Retry { attempt, delay });
        true
    }
}
