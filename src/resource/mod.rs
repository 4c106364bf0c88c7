//! Loadable resources
//!
//! A `Resource` is started once with its task arguments, runs its fetch on
//! the tokio runtime, and reports through its own signals:
//! - `on_load_start` when the fetch begins
//! - `on_progress` as bytes arrive
//! - `on_error`, `on_abort`, `on_timeout` on failure
//!
//! Success stores the payload and resolves `finished`; failure resolves
//! `failed`. Exactly one of the two ever resolves.

pub mod fetch;
pub mod image;
pub mod request;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::coordination::{Promise, Signal};
use crate::error::LoadError;

pub use fetch::{Fetcher, HttpConfig, HttpFetcher, MockFetcher, Payload, Progress, decode};
pub use image::{ImageData, sniff_dimensions};
pub use request::{LoadRequest, LoadType, ResponseType};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique resource identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res-{}", self.0)
    }
}

/// Bytes received for a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub resource: ResourceId,
    pub loaded: u64,
    pub total: Option<u64>,
}

/// A resource began loading
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStartEvent {
    pub resource: ResourceId,
    pub url: String,
    /// Arguments after the request, passed through untouched
    pub extra: Vec<Value>,
}

/// A resource failed
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub resource: ResourceId,
    pub url: Option<String>,
    pub error: LoadError,
}

/// One loadable item
pub struct Resource {
    id: ResourceId,
    started: AtomicBool,
    settled: AtomicBool,
    request: Mutex<Option<LoadRequest>>,
    payload: Mutex<Option<Payload>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    on_progress: Signal<ProgressEvent>,
    on_load_start: Signal<LoadStartEvent>,
    on_error: Signal<ErrorEvent>,
    on_abort: Signal<ErrorEvent>,
    on_timeout: Signal<ErrorEvent>,
    finished: Promise<()>,
    failed: Promise<LoadError>,
}

impl Resource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::next(),
            started: AtomicBool::new(false),
            settled: AtomicBool::new(false),
            request: Mutex::new(None),
            payload: Mutex::new(None),
            handle: Mutex::new(None),
            on_progress: Signal::new("resource.progress"),
            on_load_start: Signal::new("resource.load_start"),
            on_error: Signal::new("resource.error"),
            on_abort: Signal::new("resource.abort"),
            on_timeout: Signal::new("resource.timeout"),
            finished: Promise::new(),
            failed: Promise::new(),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The parsed request, once started
    pub fn request(&self) -> Option<LoadRequest> {
        self.request.lock().clone()
    }

    pub fn url(&self) -> Option<String> {
        self.request.lock().as_ref().map(|r| r.url.clone())
    }

    /// The loaded payload, once finished
    pub fn payload(&self) -> Option<Payload> {
        self.payload.lock().clone()
    }

    /// The failure, if the load failed
    pub fn error(&self) -> Option<LoadError> {
        self.failed.value()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_resolved()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_resolved()
    }

    pub fn on_progress(&self) -> &Signal<ProgressEvent> {
        &self.on_progress
    }

    pub fn on_load_start(&self) -> &Signal<LoadStartEvent> {
        &self.on_load_start
    }

    pub fn on_error(&self) -> &Signal<ErrorEvent> {
        &self.on_error
    }

    pub fn on_abort(&self) -> &Signal<ErrorEvent> {
        &self.on_abort
    }

    pub fn on_timeout(&self) -> &Signal<ErrorEvent> {
        &self.on_timeout
    }

    /// Resolves when the load succeeds
    pub fn finished(&self) -> &Promise<()> {
        &self.finished
    }

    /// Resolves when the load fails, is aborted, or times out
    pub fn failed(&self) -> &Promise<LoadError> {
        &self.failed
    }

    /// Begin loading. Returns immediately; the fetch runs on the current runtime.
    ///
    /// `default_timeout` applies when the request carries no `timeoutMs`.
    /// A second call is ignored.
    pub fn start(self: &Arc<Self>, args: Vec<Value>, fetcher: Arc<dyn Fetcher>, default_timeout: Option<Duration>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(resource = %self.id, "resource already started, ignoring");
            return;
        }

        let (request, extra) = match LoadRequest::from_args(&args) {
            Ok(parsed) => parsed,
            Err(error) => {
                self.fail(error);
                return;
            }
        };
        *self.request.lock() = Some(request.clone());

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.fail(LoadError::NoRuntime);
            return;
        };

        let this = self.clone();
        let handle = runtime.spawn(async move {
            this.run(request, extra, fetcher, default_timeout).await;
        });
        *self.handle.lock() = Some(handle);
    }

    async fn run(
        self: Arc<Self>,
        request: LoadRequest,
        extra: Vec<Value>,
        fetcher: Arc<dyn Fetcher>,
        default_timeout: Option<Duration>,
    ) {
        tracing::debug!(resource = %self.id, url = %request.url, "load start");
        self.on_load_start.emit(LoadStartEvent {
            resource: self.id,
            url: request.url.clone(),
            extra,
        });

        let progress = {
            let this = self.clone();
            move |p: Progress| {
                this.on_progress.emit(ProgressEvent {
                    resource: this.id,
                    loaded: p.loaded,
                    total: p.total,
                });
            }
        };

        let limit = request.timeout_ms.map(Duration::from_millis).or(default_timeout);
        let fetch = fetcher.fetch(&request, &progress);
        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => Err(LoadError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))),
            },
            None => fetch.await,
        };

        match result {
            Ok(payload) => self.finish(payload, &request.url),
            Err(error) => {
                self.fail(error);
            }
        }
    }

    /// Abort an in-flight load. Returns false if it already settled.
    pub fn abort(&self) -> bool {
        if self.settled.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.fail(LoadError::Aborted)
    }

    /// Claim the single outcome slot; false if another outcome got there first
    fn claim_outcome(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }

    fn finish(&self, payload: Payload, url: &str) {
        if !self.claim_outcome() {
            tracing::debug!(resource = %self.id, url = %url, "load already failed, payload dropped");
            return;
        }
        tracing::debug!(resource = %self.id, url = %url, bytes = payload.len(), "load finished");
        *self.payload.lock() = Some(payload);
        self.finished.resolve(());
    }

    fn fail(&self, error: LoadError) -> bool {
        if !self.claim_outcome() {
            return false;
        }
        self.failed.resolve(error.clone());
        tracing::warn!(resource = %self.id, error = %error, "load failed");

        let event = ErrorEvent {
            resource: self.id,
            url: self.url(),
            error,
        };
        match event.error {
            LoadError::Timeout(_) => self.on_timeout.emit(event),
            LoadError::Aborted => self.on_abort.emit(event),
            _ => self.on_error.emit(event),
        }
        true
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("url", &self.url())
            .field("finished", &self.is_finished())
            .field("failed", &self.is_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fetcher() -> Arc<dyn Fetcher> {
        Arc::new(
            MockFetcher::new()
                .with_body("http://localhost/ok", 5, "ok")
                .with_body("http://localhost/slow", 1_000, "slow")
                .with_error("http://localhost/bad", 5, LoadError::Network("refused".to_string())),
        )
    }

    #[tokio::test]
    async fn test_load_success() {
        let resource = Resource::new();
        let started = Arc::new(AtomicUsize::new(0));
        let s = started.clone();
        resource.on_load_start().subscribe(move |e| {
            assert_eq!(e.url, "http://localhost/ok");
            s.fetch_add(1, Ordering::SeqCst);
        });

        resource.start(vec![json!("http://localhost/ok"), json!("key")], fetcher(), None);
        resource.finished().wait().await;

        assert_eq!(resource.payload(), Some(Payload::Text("ok".to_string())));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(!resource.is_failed());
    }

    #[tokio::test]
    async fn test_load_error_emits_error() {
        let resource = Resource::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        resource.on_error().subscribe(move |event| e.lock().push(event.error.clone()));

        resource.start(vec![json!("http://localhost/bad")], fetcher(), None);
        let error = resource.failed().wait().await;

        assert_eq!(error, LoadError::Network("refused".to_string()));
        assert_eq!(*errors.lock(), vec![error]);
        assert!(!resource.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_emits_timeout() {
        let resource = Resource::new();
        let timeouts = Arc::new(AtomicUsize::new(0));
        let t = timeouts.clone();
        resource.on_timeout().subscribe(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        resource.start(vec![json!("http://localhost/slow")], fetcher(), Some(Duration::from_millis(50)));
        let error = resource.failed().wait().await;

        assert_eq!(error, LoadError::Timeout(50));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_args_fail_synchronously() {
        let resource = Resource::new();
        resource.start(vec![json!(17)], fetcher(), None);
        assert!(matches!(resource.error(), Some(LoadError::InvalidRequest(_))));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let resource = Resource::new();
        resource.start(vec![json!("http://localhost/ok")], fetcher(), None);
        assert_eq!(resource.error(), Some(LoadError::NoRuntime));
        assert_eq!(resource.url().as_deref(), Some("http://localhost/ok"));
    }

    #[tokio::test]
    async fn test_start_twice_ignored() {
        let resource = Resource::new();
        let mock = Arc::new(MockFetcher::new().with_body("http://localhost/ok", 1, "ok"));
        resource.start(vec![json!("http://localhost/ok")], mock.clone(), None);
        resource.start(vec![json!("http://localhost/ok")], mock.clone(), None);
        resource.finished().wait().await;
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_in_flight() {
        let resource = Resource::new();
        resource.start(vec![json!("http://localhost/slow")], fetcher(), None);

        assert!(resource.abort());
        assert_eq!(resource.error(), Some(LoadError::Aborted));
        assert!(!resource.abort());
    }

    #[tokio::test]
    async fn test_abort_from_progress_listener_keeps_single_outcome() {
        let resource = Resource::new();
        let target = Arc::downgrade(&resource);
        resource.on_progress().subscribe(move |_| {
            if let Some(resource) = target.upgrade() {
                resource.abort();
            }
        });

        resource.start(vec![json!("http://localhost/ok")], fetcher(), None);
        let error = resource.failed().wait().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(error, LoadError::Aborted);
        assert!(!resource.is_finished());
        assert!(resource.payload().is_none());
        assert!(!resource.abort());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Resource::new().id(), Resource::new().id());
    }
}
