//! The request lifecycle controller.
//!
//! `idle → requesting → {timed-out | stream-timed-out | resolved}`, with an
//! optional retry loop back to `requesting` after an error.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chat_stream::{DecodeError, Framing, StreamDecoder, StreamEvent};
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::callbacks::RequestCallbacks;
use crate::dispatch::ResponseKind;
use crate::error::{RequestError, Result};
use crate::options::{merge_headers, merge_params, request_defaults, RequestDefaults, RequestOptions};
use crate::transport::{ByteStream, HttpRequest, HttpTransport, ReqwestTransport};

const LAST_EVENT_ID: &str = "last-event-id";

/// Per-call overrides for one run.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Body parameters merged over the instance params.
    pub params: Option<Value>,
    /// Headers overriding instance and default headers.
    pub headers: HeaderMap,
}

impl CallOptions {
    pub fn params(params: Value) -> Self {
        Self {
            params: Some(params),
            headers: HeaderMap::new(),
        }
    }
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    handle: JoinHandle<()>,
}

impl RunHandle {
    /// Wait until the run (including retries) has settled.
    pub async fn wait(self) {
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                error!("Request run panicked: {err}");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct NoopCallbacks;

impl RequestCallbacks for NoopCallbacks {}

struct Failure {
    error: RequestError,
    headers: Option<HeaderMap>,
}

impl Failure {
    fn new(error: RequestError) -> Self {
        Self {
            error,
            headers: None,
        }
    }

    fn with_headers(error: RequestError, headers: HeaderMap) -> Self {
        Self {
            error,
            headers: Some(headers),
        }
    }
}

struct RunSlot {
    generation: u64,
    cancel: CancellationToken,
    last_call: CallOptions,
    auto_run: Option<RunHandle>,
}

struct Inner {
    options: RequestOptions,
    transport: Arc<dyn HttpTransport>,
    manual: bool,
    requesting: AtomicBool,
    timed_out: AtomicBool,
    stream_timed_out: AtomicBool,
    slot: Mutex<RunSlot>,
}

/// Owns one outstanding HTTP exchange at a time.
///
/// Cloning yields another handle to the same controller. Runs are spawned
/// on the current Tokio runtime.
#[derive(Clone)]
pub struct RequestController {
    inner: Arc<Inner>,
}

impl RequestController {
    /// Build a controller over the process-wide defaults.
    ///
    /// A non-manual controller starts its single run immediately, which
    /// requires a Tokio runtime.
    pub fn new(options: RequestOptions) -> Self {
        Self::with_defaults(options, &request_defaults())
    }

    pub fn with_defaults(options: RequestOptions, defaults: &RequestDefaults) -> Self {
        let options = options.layered_over(defaults);
        let manual = options.manual.unwrap_or(false);
        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(ReqwestTransport::default()));

        let controller = Self {
            inner: Arc::new(Inner {
                options,
                transport,
                manual,
                requesting: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                stream_timed_out: AtomicBool::new(false),
                slot: Mutex::new(RunSlot {
                    generation: 0,
                    cancel: CancellationToken::new(),
                    last_call: CallOptions::default(),
                    auto_run: None,
                }),
            }),
        };

        if !manual {
            let handle = controller.start(CallOptions::default(), None);
            lock(&controller.inner.slot).auto_run = Some(handle);
        }
        controller
    }

    /// Start a run; `None` reuses the last supplied params.
    pub fn run(&self, params: Option<Value>) -> Option<RunHandle> {
        self.run_call(
            CallOptions {
                params,
                headers: HeaderMap::new(),
            },
            None,
        )
    }

    /// Start a run reporting to `callbacks` instead of the configured ones.
    pub fn run_with(
        &self,
        params: Option<Value>,
        callbacks: Arc<dyn RequestCallbacks>,
    ) -> Option<RunHandle> {
        self.run_call(
            CallOptions {
                params,
                headers: HeaderMap::new(),
            },
            Some(callbacks),
        )
    }

    /// Start a run with per-call params and headers.
    ///
    /// Only allowed on manual controllers; otherwise a warning is logged and
    /// nothing happens. A run already in flight is superseded: its callbacks
    /// get `on_superseded` and nothing else.
    pub fn run_call(
        &self,
        call: CallOptions,
        callbacks: Option<Arc<dyn RequestCallbacks>>,
    ) -> Option<RunHandle> {
        if !self.inner.manual {
            warn!(
                "run() ignored for {}: the controller is not manual and starts on its own",
                self.inner.options.base_url
            );
            return None;
        }
        Some(self.start(call, callbacks))
    }

    /// Cancel the in-flight run; it reports one cancellation error.
    pub fn abort(&self) {
        let slot = lock(&self.inner.slot);
        if !slot.cancel.is_cancelled() {
            info!("Aborting request to {}", self.inner.options.base_url);
        }
        slot.cancel.cancel();
    }

    /// Handle of the run started at construction in automatic mode.
    pub fn take_auto_run(&self) -> Option<RunHandle> {
        lock(&self.inner.slot).auto_run.take()
    }

    pub fn is_requesting(&self) -> bool {
        self.inner.requesting.load(Ordering::SeqCst)
    }

    pub fn is_timeout(&self) -> bool {
        self.inner.timed_out.load(Ordering::SeqCst)
    }

    pub fn is_stream_timeout(&self) -> bool {
        self.inner.stream_timed_out.load(Ordering::SeqCst)
    }

    pub fn is_manual(&self) -> bool {
        self.inner.manual
    }

    pub fn options(&self) -> &RequestOptions {
        &self.inner.options
    }

    fn start(&self, call: CallOptions, callbacks: Option<Arc<dyn RequestCallbacks>>) -> RunHandle {
        let callbacks = callbacks
            .or_else(|| self.inner.options.callbacks.clone())
            .unwrap_or_else(|| Arc::new(NoopCallbacks));

        let (generation, token, call) = {
            let mut slot = lock(&self.inner.slot);
            if self.inner.requesting.load(Ordering::SeqCst) {
                debug!("Superseding in-flight run {}", slot.generation);
            }
            slot.cancel.cancel();
            slot.generation += 1;
            slot.cancel = CancellationToken::new();
            let call = CallOptions {
                params: call.params.or_else(|| slot.last_call.params.clone()),
                headers: call.headers,
            };
            slot.last_call = call.clone();
            (slot.generation, slot.cancel.clone(), call)
        };

        self.inner.requesting.store(true, Ordering::SeqCst);
        self.inner.timed_out.store(false, Ordering::SeqCst);
        self.inner.stream_timed_out.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        RunHandle {
            handle: tokio::spawn(async move {
                inner.execute(generation, token, call, callbacks).await;
            }),
        }
    }
}

impl std::fmt::Debug for RequestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestController")
            .field("options", &self.inner.options)
            .field("manual", &self.inner.manual)
            .field("requesting", &self.is_requesting())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Race `future` against `limit`; a missing or zero limit never fires.
async fn race<F: Future>(limit: Option<Duration>, future: F) -> std::result::Result<F::Output, Duration> {
    match limit.filter(|limit| !limit.is_zero()) {
        Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| limit),
        None => Ok(future.await),
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        lock(&self.slot).generation == generation
    }

    async fn execute(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
        call: CallOptions,
        callbacks: Arc<dyn RequestCallbacks>,
    ) {
        let mut last_event_id: Option<String> = None;
        let mut retries = 0u32;

        loop {
            let failure = match self
                .attempt(&call, &token, callbacks.as_ref(), &mut last_event_id)
                .await
            {
                Ok(()) => break,
                Err(failure) => failure,
            };

            if !self.is_current(generation) {
                // Superseded by a newer run; only the superseded hook fires.
                callbacks.on_superseded();
                return;
            }

            let hint = callbacks.on_error(&failure.error, failure.headers.as_ref());
            if failure.error.is_cancelled() {
                break;
            }

            let delay = hint
                .filter(|delay| !delay.is_zero())
                .or(self.options.retry_interval.filter(|delay| !delay.is_zero()));
            let Some(delay) = delay else {
                error!("Request to {} failed: {}", self.options.base_url, failure.error);
                break;
            };
            if let Some(limit) = self.options.retry_times {
                if retries >= limit {
                    error!(
                        "Request to {} failed after {} retries: {}",
                        self.options.base_url, retries, failure.error
                    );
                    break;
                }
            }
            retries += 1;
            if !callbacks.on_retry(retries, delay) {
                debug!("Retry {} of {} declined", retries, self.options.base_url);
                break;
            }
            warn!(
                "Request to {} failed ({}); retry {} in {:?}",
                self.options.base_url, failure.error, retries, delay
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    if !self.is_current(generation) {
                        callbacks.on_superseded();
                        return;
                    }
                    callbacks.on_error(&RequestError::Cancelled, None);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.is_current(generation) {
            self.requesting.store(false, Ordering::SeqCst);
        }
    }

    fn build_request(&self, call: &CallOptions, last_event_id: Option<&str>) -> Result<HttpRequest> {
        let mut headers = merge_headers(&[&self.options.headers, &call.headers]);
        if let Some(id) = last_event_id {
            match HeaderValue::from_str(id) {
                Ok(value) => {
                    headers.insert(LAST_EVENT_ID, value);
                }
                Err(_) => warn!("Last event id {id:?} is not a valid header value"),
            }
        }

        let body = merge_params(&self.options.params, call.params.as_ref());
        let body = serde_json::to_vec(&body)
            .map_err(|e| RequestError::Http(format!("Failed to encode request body: {e}")))?;

        Ok(HttpRequest {
            url: self.options.base_url.clone(),
            headers,
            body: Bytes::from(body),
        })
    }

    async fn attempt(
        &self,
        call: &CallOptions,
        token: &CancellationToken,
        callbacks: &dyn RequestCallbacks,
        last_event_id: &mut Option<String>,
    ) -> std::result::Result<(), Failure> {
        let request = self
            .build_request(call, last_event_id.as_deref())
            .map_err(Failure::new)?;

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Failure::new(RequestError::Cancelled)),
            result = race(self.options.timeout, self.transport.send(request)) => match result {
                Ok(response) => response.map_err(Failure::new)?,
                Err(limit) => {
                    self.timed_out.store(true, Ordering::SeqCst);
                    warn!("No response from {} within {:?}", self.options.base_url, limit);
                    return Err(Failure::new(RequestError::Timeout(limit)));
                }
            },
        };

        let headers = response.headers.clone();
        if !response.status.is_success() {
            let status = response.status;
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Failure::new(RequestError::Cancelled)),
                body = response.bytes() => body.unwrap_or_default(),
            };
            return Err(Failure::with_headers(
                RequestError::Status {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                },
                headers,
            ));
        }

        let kind = match ResponseKind::resolve(
            &headers,
            self.options.framing.as_ref(),
            self.options.transform.as_ref(),
        ) {
            Ok(kind) => kind,
            Err(err) => return Err(Failure::with_headers(err, headers)),
        };
        debug!("Dispatching response from {} as {:?}", self.options.base_url, kind);

        let result = match kind {
            ResponseKind::Json => self.consume_json(response.body, &headers, token, callbacks).await,
            ResponseKind::EventStream => {
                let decoder = StreamDecoder::new(response.body, Framing::sse());
                self.consume_stream(decoder, &headers, token, callbacks, last_event_id)
                    .await
            }
            ResponseKind::Framed { framing, transform } => {
                let mut decoder = StreamDecoder::new(response.body, framing);
                if let Some(transform) = transform {
                    decoder = decoder.with_transform(transform);
                }
                self.consume_stream(decoder, &headers, token, callbacks, last_event_id)
                    .await
            }
        };

        result.map_err(|error| Failure::with_headers(error, headers))
    }

    async fn consume_stream<S>(
        &self,
        mut decoder: StreamDecoder<S>,
        headers: &HeaderMap,
        token: &CancellationToken,
        callbacks: &dyn RequestCallbacks,
        last_event_id: &mut Option<String>,
    ) -> Result<()>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        let mut chunks: Vec<StreamEvent> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RequestError::Cancelled),
                next = race(self.options.stream_timeout, decoder.next()) => next,
            };

            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(limit) => {
                    self.stream_timed_out.store(true, Ordering::SeqCst);
                    warn!(
                        "Stream from {} idle for more than {:?}",
                        self.options.base_url, limit
                    );
                    return Err(RequestError::StreamTimeout(limit));
                }
            };

            match item {
                Ok(event) => {
                    if token.is_cancelled() {
                        return Err(RequestError::Cancelled);
                    }
                    if let Some(id) = event.last_event_id() {
                        *last_event_id = Some(id.to_string());
                    }
                    callbacks.on_update(&event, headers);
                    chunks.push(event);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => warn!("Skipping undecodable record: {err}"),
            }
        }

        if token.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        debug!("Stream completed with {} events", chunks.len());
        callbacks.on_success(&chunks, headers);
        Ok(())
    }

    async fn consume_json(
        &self,
        mut body: ByteStream,
        headers: &HeaderMap,
        token: &CancellationToken,
        callbacks: &dyn RequestCallbacks,
    ) -> Result<()> {
        let read = async {
            let mut buf = Vec::new();
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk?);
            }
            Ok::<_, RequestError>(buf)
        };
        let bytes = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RequestError::Cancelled),
            bytes = read => bytes?,
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
            RequestError::Decode(DecodeError::Json {
                record: String::from_utf8_lossy(&bytes).into_owned(),
                message: err.to_string(),
            })
        })?;

        if value.get("success") == Some(&Value::Bool(false)) {
            return Err(RequestError::application(value));
        }

        if token.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        // One update then one success, same shape as the streaming path.
        let chunk = StreamEvent::Json(value);
        callbacks.on_update(&chunk, headers);
        callbacks.on_success(std::slice::from_ref(&chunk), headers);
        Ok(())
    }
}
