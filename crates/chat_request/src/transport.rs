//! HTTP transport seam.

use std::error::Error;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chat_core::Config;
use futures::{Stream, StreamExt};
use log::{debug, error, info};
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy, StatusCode};

use crate::error::{RequestError, Result};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A fully prepared POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response head plus a streamed body.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl HttpResponse {
    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends one request; overridable for tests or custom stacks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Default transport backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client honouring the proxy settings of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(build_client(config)?))
    }
}

fn build_client(config: &Config) -> Result<Client> {
    let mut builder = Client::builder();
    if !config.http_proxy.is_empty() {
        builder = builder.proxy(Proxy::http(&config.http_proxy)?);
    }
    if !config.https_proxy.is_empty() {
        builder = builder.proxy(Proxy::https(&config.https_proxy)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        info!("Sending POST request to {}", request.url);
        debug!("Request headers: {:?}", request.headers);
        let start_time = std::time::Instant::now();

        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed HTTP request to {}: {}", request.url, e);
                if let Some(source) = e.source() {
                    error!("Error source: {:?}", source);
                }
                RequestError::from(e)
            })?;

        info!(
            "Got response from {} after {:?} with status {}",
            request.url,
            start_time.elapsed(),
            response.status()
        );

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RequestError::from));

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}
