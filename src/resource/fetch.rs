//! Fetch backends
//!
//! The `Fetcher` trait is the I/O seam: it turns a `LoadRequest` into a
//! decoded `Payload`, reporting progress as bytes arrive. `HttpFetcher` is
//! the real backend; `MockFetcher` serves canned responses after a delay.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{LoadError, LoaderError};
use crate::resource::image::ImageData;
use crate::resource::request::{LoadRequest, LoadType, ResponseType};

/// Decoded body of a loaded resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
    Image(ImageData),
}

impl Payload {
    /// Render as a JSON value for transform output
    ///
    /// Raw bytes are summarized by length.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Json(value) => value.clone(),
            Payload::Bytes(bytes) => json!({ "len": bytes.len() }),
            Payload::Image(image) => json!({
                "url": image.url,
                "width": image.width,
                "height": image.height,
            }),
        }
    }

    /// Size of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Json(value) => value.to_string().len(),
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Image(image) => image.bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bytes received so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub loaded: u64,
    pub total: Option<u64>,
}

/// Loads one request
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: &LoadRequest,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Payload, LoadError>;
}

/// Decode a complete body according to the request
pub fn decode(request: &LoadRequest, body: Vec<u8>) -> Result<Payload, LoadError> {
    match request.load_type {
        LoadType::Image => Ok(Payload::Image(ImageData::from_bytes(
            request.url.clone(),
            request.width,
            request.height,
            body,
        ))),
        LoadType::Xhr => match request.response_type {
            ResponseType::Text => String::from_utf8(body)
                .map(Payload::Text)
                .map_err(|e| LoadError::Decode(e.to_string())),
            ResponseType::Json => serde_json::from_slice(&body)
                .map(Payload::Json)
                .map_err(|e| LoadError::Decode(e.to_string())),
            ResponseType::ArrayBuffer => Ok(Payload::Bytes(body)),
        },
    }
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Fetches over HTTP with reqwest, streaming the body for progress
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, LoaderError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &LoadRequest,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Payload, LoadError> {
        tracing::debug!(url = %request.url, load_type = ?request.load_type, "http fetch");
        let response = self.client.get(&request.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Http {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
            on_progress(Progress {
                loaded: body.len() as u64,
                total,
            });
        }

        decode(request, body)
    }
}

#[derive(Debug, Clone)]
struct MockRoute {
    delay: Duration,
    outcome: Result<Vec<u8>, LoadError>,
}

/// Serves canned bodies or errors after a fixed delay per URL
///
/// Unknown URLs fail with HTTP 404.
#[derive(Debug, Default)]
pub struct MockFetcher {
    routes: HashMap<String, MockRoute>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `url` with `body` after `delay_ms`
    pub fn with_body(mut self, url: impl Into<String>, delay_ms: u64, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(
            url.into(),
            MockRoute {
                delay: Duration::from_millis(delay_ms),
                outcome: Ok(body.into()),
            },
        );
        self
    }

    /// Fail `url` with `error` after `delay_ms`
    pub fn with_error(mut self, url: impl Into<String>, delay_ms: u64, error: LoadError) -> Self {
        self.routes.insert(
            url.into(),
            MockRoute {
                delay: Duration::from_millis(delay_ms),
                outcome: Err(error),
            },
        );
        self
    }

    /// URLs in the order their fetches started
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        request: &LoadRequest,
        on_progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> Result<Payload, LoadError> {
        self.calls.lock().push(request.url.clone());

        let Some(route) = self.routes.get(&request.url).cloned() else {
            return Err(LoadError::Http {
                url: request.url.clone(),
                status: 404,
            });
        };

        tokio::time::sleep(route.delay).await;
        let body = route.outcome?;
        on_progress(Progress {
            loaded: body.len() as u64,
            total: Some(body.len() as u64),
        });
        decode(request, body)
    }
}
