//! Pluggable seams of the orchestrator.

use std::sync::Arc;

use chat_core::{MessageRecord, MessageStatus};
use chat_request::{HeaderMap, RequestController, RequestError};
use chat_stream::StreamEvent;
use serde_json::Value;

use crate::error::{ChatError, Result};

/// Builds the request body from the user input and the visible history.
pub trait RequestCodec<I, M>: Send + Sync {
    fn encode(&self, input: &I, history: &[MessageRecord<M>]) -> Value;
}

impl<I, M, F> RequestCodec<I, M> for F
where
    F: Fn(&I, &[MessageRecord<M>]) -> Value + Send + Sync,
{
    fn encode(&self, input: &I, history: &[MessageRecord<M>]) -> Value {
        self(input, history)
    }
}

/// Inputs of one merge step.
#[derive(Debug)]
pub struct MergeContext<'a, M> {
    /// Payload being extended; `None` when a new message is created.
    pub origin: Option<&'a M>,
    /// The chunk to merge; `None` on a completion that saw no chunk.
    pub chunk: Option<&'a StreamEvent>,
    /// Every chunk of the current attempt so far, `chunk` included.
    pub chunks: &'a [StreamEvent],
    pub status: MessageStatus,
    pub headers: &'a HeaderMap,
}

/// Maps user input and stream chunks onto message payloads.
pub trait MessageTransform<I, M>: Send + Sync {
    /// Payload of the locally authored message for `input`.
    fn local_message(&self, input: &I) -> M;

    fn merge(&self, context: MergeContext<'_, M>) -> M;
}

/// Inputs of a fallback generator.
#[derive(Debug)]
pub struct FallbackContext<'a, I, M> {
    pub input: &'a I,
    pub error: &'a RequestError,
    /// History without loading placeholders.
    pub messages: &'a [MessageRecord<M>],
    /// The message being filled when the request failed, if any.
    pub failed: Option<&'a MessageRecord<M>>,
}

/// Content shown while waiting for the first chunk.
pub enum Placeholder<I, M> {
    Value(M),
    Generate(Arc<dyn Fn(&I) -> M + Send + Sync>),
}

impl<I, M: Clone> Placeholder<I, M> {
    pub fn generate(generator: impl Fn(&I) -> M + Send + Sync + 'static) -> Self {
        Self::Generate(Arc::new(generator))
    }

    pub fn resolve(&self, input: &I) -> M {
        match self {
            Self::Value(value) => value.clone(),
            Self::Generate(generator) => generator(input),
        }
    }
}

impl<I, M: Clone> Clone for Placeholder<I, M> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Generate(generator) => Self::Generate(Arc::clone(generator)),
        }
    }
}

/// Content that replaces a failed message.
pub enum Fallback<I, M> {
    Value(M),
    Generate(Arc<dyn Fn(FallbackContext<'_, I, M>) -> M + Send + Sync>),
}

impl<I, M: Clone> Fallback<I, M> {
    pub fn generate(
        generator: impl Fn(FallbackContext<'_, I, M>) -> M + Send + Sync + 'static,
    ) -> Self {
        Self::Generate(Arc::new(generator))
    }

    pub fn resolve(&self, context: FallbackContext<'_, I, M>) -> M {
        match self {
            Self::Value(value) => value.clone(),
            Self::Generate(generator) => generator(context),
        }
    }
}

impl<I, M: Clone> Clone for Fallback<I, M> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Generate(generator) => Self::Generate(Arc::clone(generator)),
        }
    }
}

/// A manual request controller plus the codec and transform for one model backend.
pub struct ChatProvider<I, M> {
    controller: RequestController,
    codec: Arc<dyn RequestCodec<I, M>>,
    transform: Arc<dyn MessageTransform<I, M>>,
}

impl<I, M> ChatProvider<I, M> {
    pub fn new(
        controller: RequestController,
        codec: impl RequestCodec<I, M> + 'static,
        transform: impl MessageTransform<I, M> + 'static,
    ) -> Result<Self> {
        if !controller.is_manual() {
            return Err(ChatError::ProviderNotManual);
        }
        Ok(Self {
            controller,
            codec: Arc::new(codec),
            transform: Arc::new(transform),
        })
    }

    pub fn controller(&self) -> &RequestController {
        &self.controller
    }

    pub fn codec(&self) -> &Arc<dyn RequestCodec<I, M>> {
        &self.codec
    }

    pub fn transform(&self) -> &Arc<dyn MessageTransform<I, M>> {
        &self.transform
    }
}

impl<I, M> Clone for ChatProvider<I, M> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            codec: Arc::clone(&self.codec),
            transform: Arc::clone(&self.transform),
        }
    }
}
