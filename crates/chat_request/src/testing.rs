//! Scripted in-process transport.
//!
//! Responses are replayed in order and honour Tokio's clock, so tests can
//! drive timeouts with `tokio::time::pause`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::error::{RequestError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// One scripted response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    delay: Duration,
    status: StatusCode,
    headers: HeaderMap,
    chunks: Vec<(Duration, Bytes)>,
}

impl ScriptedResponse {
    pub fn new(content_type: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            delay: Duration::ZERO,
            status: StatusCode::OK,
            headers,
            chunks: Vec::new(),
        }
    }

    pub fn event_stream() -> Self {
        Self::new("text/event-stream")
    }

    pub fn json(body: serde_json::Value) -> Self {
        Self::new("application/json").chunk(Duration::ZERO, body.to_string())
    }

    /// Delay before the response head arrives.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        self
    }

    /// Body chunk emitted `pause` after the previous one.
    pub fn chunk(mut self, pause: Duration, data: impl Into<Bytes>) -> Self {
        self.chunks.push((pause, data.into()));
        self
    }
}

#[derive(Debug, Clone)]
enum Script {
    Fail(String),
    Respond(ScriptedResponse),
}

/// Replays queued scripts and records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: ScriptedResponse) -> Self {
        self.push(Script::Respond(response));
        self
    }

    /// Queue a transport-level failure.
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(Script::Fail(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn push(&self, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let script = self.scripts.lock().ok().and_then(|mut s| s.pop_front());

        match script {
            None => Err(RequestError::Http("no scripted response left".to_string())),
            Some(Script::Fail(message)) => Err(RequestError::Http(message)),
            Some(Script::Respond(response)) => {
                tokio::time::sleep(response.delay).await;
                let chunks = response.chunks;
                let body = async_stream::stream! {
                    for (pause, data) in chunks {
                        tokio::time::sleep(pause).await;
                        yield Ok::<_, RequestError>(data);
                    }
                };
                Ok(HttpResponse {
                    status: response.status,
                    headers: response.headers,
                    body: Box::pin(body),
                })
            }
        }
    }
}
