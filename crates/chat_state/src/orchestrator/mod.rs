//! Chat orchestrator - message-level policy on top of a request controller
//!
//! A request appends the local message and an optional loading placeholder,
//! then streams the reply into the store: `loading → updating* → success`,
//! or `error`/`abort` on failure. A reload runs the same flow against an
//! existing message instead of appending.

mod provider;
mod sync;

pub use provider::{
    ChatProvider, Fallback, FallbackContext, MergeContext, MessageTransform, Placeholder,
    RequestCodec,
};

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chat_core::{ConversationKey, MessageId, MessagePatch, MessageRecord, MessageStatus};
use chat_request::RunHandle;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::context::ChatContext;
use crate::error::{ChatError, Result};
use crate::store::{MessageStore, Subscription};
use sync::{MessageSync, Target};

type Loader<M> = Pin<Box<dyn Future<Output = std::result::Result<Vec<MessageRecord<M>>, String>> + Send>>;

pub struct ChatOrchestrator<I, M> {
    conversation: Option<ConversationKey>,
    store: Arc<MessageStore<M>>,
    requesting: Arc<AtomicBool>,
    provider: Option<ChatProvider<I, M>>,
    placeholder: Option<Placeholder<I, M>>,
    fallback: Option<Fallback<I, M>>,
    loading: Mutex<Option<JoinHandle<()>>>,
}

pub struct ChatOrchestratorBuilder<I, M> {
    context: Arc<ChatContext>,
    conversation: Option<ConversationKey>,
    provider: Option<ChatProvider<I, M>>,
    placeholder: Option<Placeholder<I, M>>,
    fallback: Option<Fallback<I, M>>,
    default_messages: Vec<MessageRecord<M>>,
    loader: Option<Loader<M>>,
}

impl<I, M> ChatOrchestratorBuilder<I, M>
where
    I: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Share the store and in-flight flag of `key` through the context.
    pub fn conversation(mut self, key: impl Into<ConversationKey>) -> Self {
        self.conversation = Some(key.into());
        self
    }

    pub fn provider(mut self, provider: ChatProvider<I, M>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn placeholder(mut self, placeholder: Placeholder<I, M>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn fallback(mut self, fallback: Fallback<I, M>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Initial messages, used only if this builder creates the store.
    pub fn default_messages(mut self, messages: Vec<MessageRecord<M>>) -> Self {
        self.default_messages = messages;
        self
    }

    /// Asynchronous history source, used only if this builder creates the store.
    pub fn loader<F, E>(mut self, loader: F) -> Self
    where
        F: Future<Output = std::result::Result<Vec<MessageRecord<M>>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.loader = Some(Box::pin(async move {
            loader.await.map_err(|err| err.to_string())
        }));
        self
    }

    pub fn build(self) -> Result<ChatOrchestrator<I, M>> {
        let Self {
            context,
            conversation,
            provider,
            placeholder,
            fallback,
            default_messages,
            loader,
        } = self;

        let (store, created) = match &conversation {
            Some(key) => {
                context.store_or_insert_with(key, || MessageStore::new(default_messages))?
            }
            None => (MessageStore::new(default_messages), true),
        };
        let requesting = match &conversation {
            Some(key) => context.requesting_flag(key),
            None => Arc::new(AtomicBool::new(false)),
        };

        let loading = match loader {
            Some(loader) if created => {
                if Handle::try_current().is_ok() {
                    Some(store.load(loader))
                } else {
                    warn!("No async runtime available, skipping the history loader");
                    None
                }
            }
            _ => None,
        };

        Ok(ChatOrchestrator {
            conversation,
            store,
            requesting,
            provider,
            placeholder,
            fallback,
            loading: Mutex::new(loading),
        })
    }
}

impl<I, M> ChatOrchestrator<I, M>
where
    I: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    pub fn builder(context: Arc<ChatContext>) -> ChatOrchestratorBuilder<I, M> {
        ChatOrchestratorBuilder {
            context,
            conversation: None,
            provider: None,
            placeholder: None,
            fallback: None,
            default_messages: Vec::new(),
            loader: None,
        }
    }

    /// Wait for the history loader started by the builder, if any.
    pub async fn ready(&self) {
        let loading = self
            .loading
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(loading) = loading {
            if let Err(err) = loading.await {
                if err.is_panic() {
                    error!("History loader panicked: {err}");
                }
            }
        }
    }

    /// Send `input` as a new turn.
    pub fn request(&self, input: I) -> Result<RunHandle> {
        let provider = self.provider.as_ref().ok_or(ChatError::MissingProvider)?;
        self.begin()?;

        let local = provider.transform().local_message(&input);
        self.store
            .add_message(MessageRecord::with_generated_id(local, MessageStatus::Local));

        let history = self.request_messages();

        let placeholder = self.placeholder.as_ref().map(|placeholder| {
            let record =
                MessageRecord::with_generated_id(placeholder.resolve(&input), MessageStatus::Loading);
            let id = record.id.clone();
            self.store.add_message(record);
            id
        });

        self.dispatch(provider, input, &history, Target::Append { placeholder })
    }

    /// Re-run `input` into the existing message `id`.
    pub fn reload(&self, id: &MessageId, input: I) -> Result<RunHandle> {
        let provider = self.provider.as_ref().ok_or(ChatError::MissingProvider)?;
        if self.store.get_message(id).is_none() {
            return Err(ChatError::MessageNotFound(id.clone()));
        }
        self.begin()?;

        let history: Vec<_> = self
            .request_messages()
            .into_iter()
            .filter(|m| &m.id != id)
            .collect();

        let patch = match &self.placeholder {
            Some(placeholder) => {
                MessagePatch::payload(placeholder.resolve(&input), MessageStatus::Loading)
            }
            None => MessagePatch::status(MessageStatus::Loading),
        };
        self.store.set_message(id, patch);

        self.dispatch(provider, input, &history, Target::Reload(id.clone()))
    }

    /// Cancel the active request.
    pub fn abort(&self) -> Result<()> {
        let provider = self.provider.as_ref().ok_or(ChatError::MissingProvider)?;
        provider.controller().abort();
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        self.requesting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| {
                debug!("Request refused, conversation {:?} is busy", self.conversation);
                ChatError::RequestInFlight
            })
    }

    fn dispatch(
        &self,
        provider: &ChatProvider<I, M>,
        input: I,
        history: &[MessageRecord<M>],
        target: Target,
    ) -> Result<RunHandle> {
        let body = provider.codec().encode(&input, history);
        info!(
            "Requesting reply for conversation {:?} with {} history messages",
            self.conversation,
            history.len()
        );

        let sync = MessageSync::new(
            Arc::clone(&self.store),
            Arc::clone(&self.requesting),
            Arc::clone(provider.transform()),
            self.fallback.clone(),
            input,
            target,
        );
        match provider.controller().run_with(Some(body), Arc::new(sync)) {
            Some(handle) => Ok(handle),
            None => {
                self.requesting.store(false, Ordering::SeqCst);
                Err(ChatError::ProviderNotManual)
            }
        }
    }

    pub fn messages(&self) -> Arc<Vec<MessageRecord<M>>> {
        self.store.messages()
    }

    /// History as sent to the model: loading placeholders are left out.
    pub fn request_messages(&self) -> Vec<MessageRecord<M>> {
        self.store
            .messages()
            .iter()
            .filter(|m| m.status != MessageStatus::Loading)
            .cloned()
            .collect()
    }

    pub fn is_requesting(&self) -> bool {
        self.requesting.load(Ordering::SeqCst)
    }

    pub fn conversation(&self) -> Option<&ConversationKey> {
        self.conversation.as_ref()
    }

    pub fn store(&self) -> &Arc<MessageStore<M>> {
        &self.store
    }

    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(listener)
    }

    pub fn set_messages(&self, messages: Vec<MessageRecord<M>>) {
        self.store.replace_messages(messages);
    }

    pub fn set_message(&self, id: &MessageId, patch: MessagePatch<M>) -> bool {
        self.store.set_message(id, patch)
    }

    pub fn add_message(&self, message: MessageRecord<M>) -> bool {
        self.store.add_message(message)
    }

    pub fn remove_message(&self, id: &MessageId) -> bool {
        self.store.remove_message(id)
    }
}
