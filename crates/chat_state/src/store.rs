//! Observable, throttled message container.
//!
//! Every mutation replaces the snapshot and notifies listeners through a
//! [`Throttle`]: the first change of a quiet window notifies immediately and
//! later changes in the same window are flushed once when it ends.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chat_core::{MessageId, MessagePatch, MessageRecord};
use log::{debug, error, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::throttle::{Throttle, THROTTLE_WINDOW};

/// Change listener. It may read the store but should not mutate it.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

type Snapshot<M> = Arc<Vec<MessageRecord<M>>>;

struct StoreState<M> {
    messages: Snapshot<M>,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
    throttle: Throttle,
    timer: Option<JoinHandle<()>>,
    destroyed: bool,
}

impl<M> StoreState<M> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.throttle.cancel();
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Ordered message records of one conversation.
///
/// Always held as `Arc<MessageStore<M>>`; the throttle timer keeps only a
/// weak reference, so dropping the last handle stops notifications.
pub struct MessageStore<M> {
    this: Weak<MessageStore<M>>,
    state: Mutex<StoreState<M>>,
}

/// Keeps a listener registered until dropped or [`unsubscribe`](Self::unsubscribe)d.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<M> MessageStore<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub fn new(messages: Vec<MessageRecord<M>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(StoreState {
                messages: Arc::new(messages),
                listeners: Vec::new(),
                next_listener: 0,
                throttle: Throttle::new(),
                timer: None,
                destroyed: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<M>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current snapshot. Cheap to clone, never mutated in place.
    pub fn messages(&self) -> Snapshot<M> {
        Arc::clone(&self.lock().messages)
    }

    pub fn get_message(&self, id: &MessageId) -> Option<MessageRecord<M>> {
        self.lock().messages.iter().find(|m| &m.id == id).cloned()
    }

    /// Replace the collection with a function of the previous one.
    ///
    /// The updater runs under the store lock and must not call back into
    /// the store.
    pub fn set_messages<F>(&self, update: F)
    where
        F: FnOnce(&[MessageRecord<M>]) -> Vec<MessageRecord<M>>,
    {
        let due = {
            let mut state = self.lock();
            let next = update(state.messages.as_slice());
            state.messages = Arc::new(next);
            self.schedule(&mut state)
        };
        notify(due);
    }

    pub fn replace_messages(&self, messages: Vec<MessageRecord<M>>) {
        self.set_messages(|_| messages);
    }

    /// Append a record; `false` if its id is already present.
    pub fn add_message(&self, message: MessageRecord<M>) -> bool {
        self.modify(|messages| {
            if messages.iter().any(|m| m.id == message.id) {
                debug!("Message {} already exists", message.id);
                return false;
            }
            messages.push(message);
            true
        })
    }

    /// Apply a partial update; `false` if the id is unknown.
    pub fn set_message(&self, id: &MessageId, patch: MessagePatch<M>) -> bool {
        self.update_message(id, |record| record.apply(patch))
    }

    /// Mutate one record in place; `false` if the id is unknown.
    pub fn update_message<F>(&self, id: &MessageId, update: F) -> bool
    where
        F: FnOnce(&mut MessageRecord<M>),
    {
        self.modify(|messages| match messages.iter_mut().find(|m| &m.id == id) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        })
    }

    pub fn remove_message(&self, id: &MessageId) -> bool {
        self.modify(|messages| match messages.iter().position(|m| &m.id == id) {
            Some(index) => {
                messages.remove(index);
                true
            }
            None => false,
        })
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.lock();
        if state.destroyed {
            warn!("subscribe() on a destroyed message store is ignored");
            return Subscription::inert();
        }
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.push((id, Arc::new(listener)));

        let store = self.this.clone();
        Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                store.unsubscribe(id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Deliver an owed trailing notification now and close the window.
    pub fn flush_now(&self) {
        let due = {
            let mut state = self.lock();
            let pending = state.throttle.flush_now();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            pending.then(|| state.listeners())
        };
        notify(due);
    }

    /// Cancel the timer and drop every listener. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.cancel_timer();
        state.listeners.clear();
        debug!("Message store destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Populate the store from an asynchronous source.
    ///
    /// A failure is logged and leaves the store as it was. Nothing is
    /// written once the store has been destroyed or dropped. Must be called
    /// within a Tokio runtime.
    pub fn load<F, E>(&self, source: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Vec<MessageRecord<M>>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let store = self.this.clone();
        tokio::spawn(async move {
            let result = source.await;
            let Some(store) = store.upgrade() else {
                return;
            };
            match result {
                Ok(messages) if !store.is_destroyed() => {
                    debug!("Loaded {} messages", messages.len());
                    store.replace_messages(messages);
                }
                Ok(_) => debug!("Store destroyed before loading finished"),
                Err(err) => error!("Failed to load messages: {err}"),
            }
        })
    }

    fn modify<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut Vec<MessageRecord<M>>) -> bool,
    {
        let due = {
            let mut state = self.lock();
            let mut next = Vec::clone(&state.messages);
            if !change(&mut next) {
                return false;
            }
            state.messages = Arc::new(next);
            self.schedule(&mut state)
        };
        notify(due);
        true
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.lock();
        state.listeners.retain(|(listener, _)| *listener != id);
        if state.listeners.is_empty() {
            state.cancel_timer();
        }
    }

    /// Listeners to call now, if the change opens a window.
    fn schedule(&self, state: &mut StoreState<M>) -> Option<Vec<Listener>> {
        if state.listeners.is_empty() {
            return None;
        }
        let epoch = state.throttle.on_change()?;

        match Handle::try_current() {
            Ok(handle) => {
                let store = self.this.clone();
                state.timer = Some(handle.spawn(async move {
                    tokio::time::sleep(THROTTLE_WINDOW).await;
                    if let Some(store) = store.upgrade() {
                        store.on_timer(epoch);
                    }
                }));
            }
            // Without a runtime there is nothing to flush later.
            Err(_) => state.throttle.cancel(),
        }
        Some(state.listeners())
    }

    fn on_timer(&self, epoch: u64) {
        let due = {
            let mut state = self.lock();
            if !state.throttle.on_timer(epoch) {
                return;
            }
            state.timer = None;
            Some(state.listeners())
        };
        notify(due);
    }
}

impl<M> std::fmt::Debug for MessageStore<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("MessageStore")
            .field("messages", &state.messages.len())
            .field("listeners", &state.listeners.len())
            .field("throttle", &state.throttle.state())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

fn notify(listeners: Option<Vec<Listener>>) {
    for listener in listeners.into_iter().flatten() {
        listener();
    }
}
