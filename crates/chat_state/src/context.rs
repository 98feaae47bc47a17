//! Conversation registry.
//!
//! Maps a conversation key to its message store and its in-flight flag so
//! independent call sites share state for the same conversation. The first
//! store registered for a key wins.

use std::any::Any;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chat_core::ConversationKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use once_cell::sync::Lazy;

use crate::error::{ChatError, Result};
use crate::store::MessageStore;

trait ErasedStore: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn destroy(&self);
}

impl<M> ErasedStore for MessageStore<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn destroy(&self) {
        MessageStore::destroy(self);
    }
}

static GLOBAL_CONTEXT: Lazy<Arc<ChatContext>> = Lazy::new(|| Arc::new(ChatContext::new()));

#[derive(Default)]
pub struct ChatContext {
    stores: DashMap<ConversationKey, Arc<dyn ErasedStore>>,
    requesting: DashMap<ConversationKey, Arc<AtomicBool>>,
}

impl ChatContext {
    /// An isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ChatContext> {
        Arc::clone(&GLOBAL_CONTEXT)
    }

    /// The store for `key`, created empty on first use.
    pub fn store<M>(&self, key: &ConversationKey) -> Result<Arc<MessageStore<M>>>
    where
        M: Clone + Send + Sync + 'static,
    {
        self.store_or_insert_with(key, || MessageStore::new(Vec::new()))
            .map(|(store, _)| store)
    }

    /// The store for `key`, or the one built by `init` if none is registered.
    ///
    /// The flag is `true` when `init` ran.
    pub fn store_or_insert_with<M, F>(
        &self,
        key: &ConversationKey,
        init: F,
    ) -> Result<(Arc<MessageStore<M>>, bool)>
    where
        M: Clone + Send + Sync + 'static,
        F: FnOnce() -> Arc<MessageStore<M>>,
    {
        match self.stores.entry(key.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get())
                .into_any()
                .downcast::<MessageStore<M>>()
                .map(|store| (store, false))
                .map_err(|_| ChatError::StoreTypeMismatch(key.clone())),
            Entry::Vacant(entry) => {
                let store = init();
                entry.insert(Arc::clone(&store) as Arc<dyn ErasedStore>);
                debug!("Registered message store for conversation {key}");
                Ok((store, true))
            }
        }
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.stores.contains_key(key)
    }

    /// Shared in-flight flag of a conversation.
    pub fn requesting_flag(&self, key: &ConversationKey) -> Arc<AtomicBool> {
        Arc::clone(self.requesting.entry(key.clone()).or_default().value())
    }

    /// Destroy and forget one conversation.
    pub fn remove(&self, key: &ConversationKey) {
        if let Some((_, store)) = self.stores.remove(key) {
            store.destroy();
        }
        self.requesting.remove(key);
    }

    /// Destroy every registered store and clear the registry.
    pub fn dispose(&self) {
        for entry in self.stores.iter() {
            entry.value().destroy();
        }
        self.stores.clear();
        self.requesting.clear();
        debug!("Chat context disposed");
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl std::fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatContext")
            .field("stores", &self.stores.len())
            .field("requesting", &self.requesting.len())
            .finish()
    }
}
