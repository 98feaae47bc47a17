//! Applies request notifications to the message store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chat_core::{MessageId, MessagePatch, MessageRecord, MessageStatus};
use chat_request::{HeaderMap, RequestCallbacks, RequestError};
use chat_stream::StreamEvent;
use log::{debug, warn};

use super::provider::{Fallback, FallbackContext, MergeContext, MessageTransform};
use crate::store::MessageStore;

/// Which message a run writes into.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    /// A new reply, replacing the loading placeholder if there is one.
    Append { placeholder: Option<MessageId> },
    /// An existing message, overwritten in place.
    Reload(MessageId),
}

#[derive(Default)]
struct Progress {
    /// Message receiving the current attempt's chunks.
    current: Option<MessageId>,
    chunks: Vec<StreamEvent>,
}

pub(crate) struct MessageSync<I, M> {
    store: Arc<MessageStore<M>>,
    requesting: Arc<AtomicBool>,
    // Whether this run currently owns `requesting`.
    holding: AtomicBool,
    transform: Arc<dyn MessageTransform<I, M>>,
    fallback: Option<Fallback<I, M>>,
    input: I,
    target: Target,
    progress: Mutex<Progress>,
}

impl<I, M> MessageSync<I, M>
where
    I: Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        store: Arc<MessageStore<M>>,
        requesting: Arc<AtomicBool>,
        transform: Arc<dyn MessageTransform<I, M>>,
        fallback: Option<Fallback<I, M>>,
        input: I,
        target: Target,
    ) -> Self {
        let current = match &target {
            Target::Reload(id) => Some(id.clone()),
            Target::Append { .. } => None,
        };
        Self {
            store,
            requesting,
            holding: AtomicBool::new(true),
            transform,
            fallback,
            input,
            target,
            progress: Mutex::new(Progress {
                current,
                chunks: Vec::new(),
            }),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn release(&self) {
        if self.holding.swap(false, Ordering::SeqCst) {
            self.requesting.store(false, Ordering::SeqCst);
        }
    }

    /// The message this run answers into: the streamed reply once it
    /// exists, else the placeholder or reload target.
    fn tracked(&self, progress: &Progress) -> Option<MessageId> {
        progress.current.clone().or_else(|| match &self.target {
            Target::Append { placeholder } => placeholder.clone(),
            Target::Reload(id) => Some(id.clone()),
        })
    }

    /// Apply `patch` to `id`, warning when its status change is not a
    /// valid lifecycle step. The patch is applied either way.
    fn patch(&self, id: &MessageId, patch: MessagePatch<M>) -> bool {
        self.store.update_message(id, |record| {
            if let Some(next) = patch.status {
                if let Err(err) = record.status.transition(next) {
                    warn!("Message {id}: {err}");
                }
            }
            record.apply(patch);
        })
    }

    /// Swap the placeholder (if still present) for `record`, else append it.
    fn insert_reply(&self, record: MessageRecord<M>) {
        let placeholder = match &self.target {
            Target::Append { placeholder } => placeholder.clone(),
            Target::Reload(_) => None,
        };
        self.replace_or_append(placeholder.as_ref(), record);
    }

    fn replace_or_append(&self, old: Option<&MessageId>, record: MessageRecord<M>) {
        self.store.set_messages(|messages| {
            let mut next = messages.to_vec();
            match old.and_then(|id| next.iter().position(|m| &m.id == id)) {
                Some(index) => next[index] = record,
                None => next.push(record),
            }
            next
        });
    }
}

impl<I, M> RequestCallbacks for MessageSync<I, M>
where
    I: Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    fn on_update(&self, chunk: &StreamEvent, headers: &HeaderMap) {
        let mut progress = self.progress();
        progress.chunks.push(chunk.clone());
        // The first chunk of an attempt starts the content over.
        let first = progress.chunks.len() == 1;

        match progress.current.clone() {
            Some(id) => {
                let Some(record) = self.store.get_message(&id) else {
                    warn!("Message {id} disappeared while streaming");
                    return;
                };
                let payload = self.transform.merge(MergeContext {
                    origin: (!first).then_some(&record.payload),
                    chunk: Some(chunk),
                    chunks: &progress.chunks,
                    status: MessageStatus::Updating,
                    headers,
                });
                self.patch(&id, MessagePatch::payload(payload, MessageStatus::Updating));
            }
            None => {
                let payload = self.transform.merge(MergeContext {
                    origin: None,
                    chunk: Some(chunk),
                    chunks: &progress.chunks,
                    status: MessageStatus::Updating,
                    headers,
                });
                let record = MessageRecord::with_generated_id(payload, MessageStatus::Updating);
                debug!("Streaming into new message {}", record.id);
                progress.current = Some(record.id.clone());
                self.insert_reply(record);
            }
        }
    }

    fn on_success(&self, chunks: &[StreamEvent], headers: &HeaderMap) {
        let mut progress = self.progress();

        if progress.chunks.is_empty() {
            // Nothing was merged: build the final payload from the completion alone.
            match &self.target {
                Target::Reload(id) => {
                    let origin = self.store.get_message(id).map(|m| m.payload);
                    let payload = self.transform.merge(MergeContext {
                        origin: origin.as_ref(),
                        chunk: None,
                        chunks,
                        status: MessageStatus::Success,
                        headers,
                    });
                    self.patch(id, MessagePatch::payload(payload, MessageStatus::Success));
                }
                Target::Append { .. } => {
                    let payload = self.transform.merge(MergeContext {
                        origin: None,
                        chunk: None,
                        chunks,
                        status: MessageStatus::Success,
                        headers,
                    });
                    let record = MessageRecord::with_generated_id(payload, MessageStatus::Success);
                    progress.current = Some(record.id.clone());
                    self.insert_reply(record);
                }
            }
        } else if let Some(id) = &progress.current {
            self.patch(id, MessagePatch::status(MessageStatus::Success));
        }

        progress.chunks.clear();
        self.release();
    }

    fn on_error(&self, error: &RequestError, _headers: Option<&HeaderMap>) -> Option<Duration> {
        // Released until `on_retry` takes it back.
        self.release();

        let status = if error.is_cancelled() {
            MessageStatus::Abort
        } else {
            MessageStatus::Error
        };

        let mut progress = self.progress();
        progress.chunks.clear();
        // Before the first chunk the placeholder stands in for the reply.
        let failing = self.tracked(&progress);

        match &self.fallback {
            Some(fallback) => {
                let history: Vec<_> = self
                    .store
                    .messages()
                    .iter()
                    .filter(|m| m.status != MessageStatus::Loading)
                    .cloned()
                    .collect();
                let failed = failing.as_ref().and_then(|id| self.store.get_message(id));
                let payload = fallback.resolve(FallbackContext {
                    input: &self.input,
                    error,
                    messages: &history,
                    failed: failed.as_ref(),
                });

                match &self.target {
                    Target::Reload(id) => {
                        self.patch(id, MessagePatch::payload(payload, status));
                    }
                    Target::Append { .. } => {
                        let record = MessageRecord::with_generated_id(payload, status);
                        progress.current = Some(record.id.clone());
                        self.replace_or_append(failing.as_ref(), record);
                    }
                }
            }
            None => match failing {
                Some(id) => {
                    self.patch(&id, MessagePatch::status(status));
                }
                None => debug!("Request failed before any message was created: {error}"),
            },
        }
        None
    }

    fn on_retry(&self, attempt: u32, _delay: Duration) -> bool {
        if self
            .requesting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Conversation was taken over, dropping retry {attempt}");
            return false;
        }
        self.holding.store(true, Ordering::SeqCst);

        let progress = self.progress();
        if let Some(id) = self.tracked(&progress) {
            self.patch(&id, MessagePatch::status(MessageStatus::Loading));
        }
        true
    }

    fn on_superseded(&self) {
        let mut progress = self.progress();
        progress.chunks.clear();
        if let Some(id) = self.tracked(&progress) {
            let pending = self
                .store
                .get_message(&id)
                .is_some_and(|record| record.status.is_pending());
            if pending {
                debug!("Run for message {id} was superseded");
                self.patch(&id, MessagePatch::status(MessageStatus::Abort));
            }
        }
        drop(progress);
        self.release();
    }
}
