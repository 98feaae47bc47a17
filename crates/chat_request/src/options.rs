//! Request configuration layers.
//!
//! Effective settings are resolved per run from three layers: process-wide
//! [`RequestDefaults`], per-instance [`RequestOptions`] and per-call params.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chat_core::Config;
use chat_stream::{Framing, TransformSelector};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::callbacks::RequestCallbacks;
use crate::transport::HttpTransport;

/// Process-wide defaults applied to every controller unless overridden.
#[derive(Clone, Default)]
pub struct RequestDefaults {
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub stream_timeout: Option<Duration>,
    pub manual: Option<bool>,
    pub transform: Option<TransformSelector>,
    /// Replaces the default `reqwest` transport.
    pub transport: Option<Arc<dyn HttpTransport>>,
}

impl RequestDefaults {
    /// Defaults derived from the file/env configuration.
    ///
    /// Header entries that are not valid HTTP names or values are skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => log::warn!("Skipping invalid configured header {name:?}"),
            }
        }

        Self {
            headers,
            timeout: config.timeout_ms.map(Duration::from_millis),
            stream_timeout: config.stream_timeout_ms.map(Duration::from_millis),
            manual: Some(config.manual),
            transform: None,
            transport: None,
        }
    }
}

impl std::fmt::Debug for RequestDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDefaults")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("manual", &self.manual)
            .field("transform", &self.transform.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

static GLOBAL_DEFAULTS: Lazy<RwLock<RequestDefaults>> =
    Lazy::new(|| RwLock::new(RequestDefaults::default()));

/// Replace the process-wide defaults.
pub fn set_request_defaults(defaults: RequestDefaults) {
    match GLOBAL_DEFAULTS.write() {
        Ok(mut guard) => *guard = defaults,
        Err(poisoned) => *poisoned.into_inner() = defaults,
    }
}

/// Snapshot of the process-wide defaults.
pub fn request_defaults() -> RequestDefaults {
    match GLOBAL_DEFAULTS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Per-instance configuration of a [`RequestController`](crate::RequestController).
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub base_url: String,
    pub headers: HeaderMap,
    /// Static body parameters merged under every call's params.
    pub params: Value,
    pub timeout: Option<Duration>,
    pub stream_timeout: Option<Duration>,
    pub retry_interval: Option<Duration>,
    /// Maximum number of retries; `None` retries without bound.
    pub retry_times: Option<u32>,
    pub manual: Option<bool>,
    /// Forces stream decoding with this framing regardless of content type.
    pub framing: Option<Framing>,
    pub transform: Option<TransformSelector>,
    pub transport: Option<Arc<dyn HttpTransport>>,
    pub callbacks: Option<Arc<dyn RequestCallbacks>>,
}

impl RequestOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, interval: Duration, times: Option<u32>) -> Self {
        self.retry_interval = Some(interval);
        self.retry_times = times;
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.framing = Some(framing);
        self
    }

    pub fn transform(mut self, transform: TransformSelector) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn RequestCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Fill unset fields from `defaults`; instance headers override default headers.
    pub(crate) fn layered_over(mut self, defaults: &RequestDefaults) -> Self {
        let mut base = HeaderMap::new();
        base.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.headers = merge_headers(&[&base, &defaults.headers, &self.headers]);
        self.timeout = self.timeout.or(defaults.timeout);
        self.stream_timeout = self.stream_timeout.or(defaults.stream_timeout);
        self.manual = self.manual.or(defaults.manual);
        if self.transform.is_none() {
            self.transform = defaults.transform.clone();
        }
        if self.transport.is_none() {
            self.transport = defaults.transport.clone();
        }
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("retry_interval", &self.retry_interval)
            .field("retry_times", &self.retry_times)
            .field("manual", &self.manual)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

/// Merge header layers; a later layer replaces every value of a header it sets.
pub fn merge_headers(layers: &[&HeaderMap]) -> HeaderMap {
    let mut merged = HeaderMap::new();
    for layer in layers {
        for name in layer.keys() {
            merged.remove(name);
            for value in layer.get_all(name) {
                merged.append(name.clone(), value.clone());
            }
        }
    }
    merged
}

/// Shallow merge of static and per-call body parameters.
pub fn merge_params(base: &Value, call: Option<&Value>) -> Value {
    match (base, call) {
        (Value::Object(base), Some(Value::Object(call))) => {
            let mut merged = base.clone();
            for (key, value) in call {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Some(call)) if !call.is_null() => call.clone(),
        (base, _) if base.is_null() => Value::Object(Default::default()),
        (base, _) => base.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn later_header_layers_win() {
        let global = headers(&[("x-a", "global"), ("x-b", "global")]);
        let instance = headers(&[("x-b", "instance"), ("x-c", "instance")]);
        let call = headers(&[("x-c", "call")]);

        let merged = merge_headers(&[&global, &instance, &call]);
        assert_eq!(merged["x-a"], "global");
        assert_eq!(merged["x-b"], "instance");
        assert_eq!(merged["x-c"], "call");
    }

    #[test]
    fn header_layer_replaces_all_values() {
        let global = headers(&[("accept", "a"), ("accept", "b")]);
        let instance = headers(&[("accept", "c")]);
        let merged = merge_headers(&[&global, &instance]);
        let values: Vec<_> = merged.get_all("accept").iter().collect();
        assert_eq!(values, vec!["c"]);
    }

    #[test]
    fn params_merge_shallowly() {
        let merged = merge_params(
            &json!({"model": "m1", "stream": true}),
            Some(&json!({"model": "m2", "messages": []})),
        );
        assert_eq!(merged, json!({"model": "m2", "stream": true, "messages": []}));
        assert_eq!(merge_params(&Value::Null, None), json!({}));
        assert_eq!(merge_params(&json!({"a": 1}), Some(&json!("raw"))), json!("raw"));
    }

    #[test]
    fn options_fall_back_to_defaults() {
        let defaults = RequestDefaults {
            headers: headers(&[("authorization", "Bearer default"), ("x-app", "chat")]),
            timeout: Some(Duration::from_secs(5)),
            manual: Some(true),
            ..RequestDefaults::default()
        };
        let options = RequestOptions::new("http://localhost")
            .header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static("Bearer instance"),
            )
            .stream_timeout(Duration::from_secs(1))
            .layered_over(&defaults);

        assert_eq!(options.headers["authorization"], "Bearer instance");
        assert_eq!(options.headers["x-app"], "chat");
        assert_eq!(options.headers[CONTENT_TYPE], "application/json");
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.stream_timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.manual, Some(true));
    }

    #[test]
    fn defaults_from_config() {
        let mut config = Config::default();
        config.timeout_ms = Some(1500);
        config.headers.insert("x-team".to_string(), "ui".to_string());
        config.headers.insert("bad header".to_string(), "x".to_string());

        let defaults = RequestDefaults::from_config(&config);
        assert_eq!(defaults.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(defaults.headers["x-team"], "ui");
        assert_eq!(defaults.headers.len(), 1);
        assert_eq!(defaults.manual, Some(false));
    }
}
