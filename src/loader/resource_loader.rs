//! ResourceLoader: turns batches of resources into scheduled work.
//!
//! Each batch becomes one scheduler group. Per-resource events are relayed
//! on loader-wide signals regardless of batch, group completion runs the
//! batch's middleware transform and emits `load_complete`, and the end of a
//! run clears run-scoped listeners before emitting `complete`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::coordination::{Promise, Signal, SubscriptionId};
use crate::error::{LoaderError, Result};
use crate::loader::events::BatchComplete;
use crate::loader::middleware::{DefaultMiddleware, Middleware, ResourceEntry};
use crate::resource::{ErrorEvent, Fetcher, HttpConfig, HttpFetcher, LoadStartEvent, ProgressEvent, Resource};
use crate::scheduler::{Group, GroupId, Scheduler, SettleHook, Task};

/// Default number of resources loading at once
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Configuration for the ResourceLoader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Maximum resources loading at once.
    pub concurrency: usize,
    /// Treat a failed, aborted, or timed-out resource as settled.
    ///
    /// Off by default: a failure is only reported on `on_error`, and its
    /// batch (and the run) never completes.
    pub settle_on_error: bool,
    /// Timeout for requests that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            settle_on_error: false,
            default_timeout: None,
        }
    }
}

impl LoaderConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_settle_on_error(mut self, settle_on_error: bool) -> Self {
        self.settle_on_error = settle_on_error;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Handle to a submitted batch
#[derive(Debug, Clone)]
pub struct BatchHandle {
    id: GroupId,
    key: Option<String>,
    resources: Vec<Arc<Resource>>,
}

impl BatchHandle {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Resources in the order they were added
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// Abort members that have started but not settled
    ///
    /// Cancellation alone never interrupts in-flight work; this does.
    pub fn abort_started(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.is_started())
            .filter(|r| r.abort())
            .count()
    }
}

type BatchCallback = Box<dyn FnOnce(Vec<Arc<Resource>>) + Send>;

struct Stage {
    id: String,
    middleware: Arc<dyn Middleware>,
}

struct LoaderInner {
    config: LoaderConfig,
    scheduler: Scheduler<Resource>,
    fetcher: Arc<dyn Fetcher>,
    middleware: Mutex<HashMap<String, Arc<dyn Middleware>>>,
    pre: Signal<Arc<Resource>>,
    after: Signal<BatchComplete>,
    on_progress: Signal<ProgressEvent>,
    on_load_start: Signal<LoadStartEvent>,
    on_load_complete: Signal<BatchComplete>,
    on_error: Signal<ErrorEvent>,
    on_complete: Signal<()>,
}

impl LoaderInner {
    fn relay_events(self: &Arc<Self>, resource: &Arc<Resource>) {
        let weak = Arc::downgrade(self);
        resource.on_progress().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_progress.emit(event.clone());
            }
        });

        let weak = Arc::downgrade(self);
        let started = Arc::downgrade(resource);
        resource.on_load_start().subscribe_once(move |event| {
            if let Some(inner) = weak.upgrade() {
                if let Some(resource) = started.upgrade() {
                    inner.pre.emit(resource);
                }
                inner.on_load_start.emit(event.clone());
            }
        });

        for signal in [resource.on_error(), resource.on_abort(), resource.on_timeout()] {
            let weak = Arc::downgrade(self);
            signal.subscribe(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_error.emit(event.clone());
                }
            });
        }
    }

    fn task(&self, entry: ResourceEntry) -> Task<Resource> {
        let ResourceEntry { resource, args } = entry;
        let fetcher = self.fetcher.clone();
        let default_timeout = self.config.default_timeout;
        let settle_on_error = self.config.settle_on_error;

        let started = resource.clone();
        let watched = resource.clone();
        Task::new(
            resource,
            args,
            move |args| started.start(args, fetcher, default_timeout),
            move |hook: SettleHook| {
                if settle_on_error {
                    let on_failure = hook.clone();
                    watched.failed().then(move |_| on_failure.settle());
                }
                watched.finished().then(move |_| hook.settle());
            },
        )
    }

    fn complete_batch(
        &self,
        batch: GroupId,
        key: Option<String>,
        stage: Option<Stage>,
        resources: Vec<Arc<Resource>>,
        on_complete: Option<BatchCallback>,
    ) {
        let (middleware, data): (Option<String>, Vec<Value>) = match &stage {
            Some(stage) => (Some(stage.id.clone()), stage.middleware.transform(&resources)),
            None => (None, DefaultMiddleware.transform(&resources)),
        };
        let event = BatchComplete {
            batch,
            key,
            middleware,
            data,
        };
        tracing::debug!(batch = %batch, resources = resources.len(), "batch complete");

        if let Some(on_complete) = on_complete {
            on_complete(resources);
        }
        if stage.is_some() {
            self.after.emit(event.clone());
        }
        self.on_load_complete.emit(event);
    }

    fn finish_run(&self) {
        tracing::info!("all batches settled");
        self.pre.unsubscribe_all();
        self.after.unsubscribe_all();
        self.on_complete.emit(());
    }
}

/// Loads batches of resources under a concurrency limit
///
/// Cloning yields another handle to the same loader.
#[derive(Clone)]
pub struct ResourceLoader {
    inner: Arc<LoaderInner>,
}

impl ResourceLoader {
    /// Create a loader fetching over HTTP
    pub fn new(config: LoaderConfig, http: &HttpConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(http)?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// Create a loader with a custom fetch backend
    pub fn with_fetcher(config: LoaderConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let scheduler = Scheduler::new(config.concurrency);
        Self {
            inner: Arc::new(LoaderInner {
                config,
                scheduler,
                fetcher,
                middleware: Mutex::new(HashMap::new()),
                pre: Signal::new("loader.pre"),
                after: Signal::new("loader.after"),
                on_progress: Signal::new("loader.progress"),
                on_load_start: Signal::new("loader.load_start"),
                on_load_complete: Signal::new("loader.load_complete"),
                on_error: Signal::new("loader.error"),
                on_complete: Signal::new("loader.complete"),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// The underlying scheduler
    pub fn scheduler(&self) -> &Scheduler<Resource> {
        &self.inner.scheduler
    }

    /// Register a middleware under `id`, replacing any previous one
    pub fn add_middleware(&self, id: impl Into<String>, middleware: Arc<dyn Middleware>) -> Arc<dyn Middleware> {
        let id = id.into();
        tracing::debug!(middleware = %id, "middleware added");
        self.inner.middleware.lock().insert(id, middleware.clone());
        middleware
    }

    pub fn remove_middleware(&self, id: &str) -> Option<Arc<dyn Middleware>> {
        self.inner.middleware.lock().remove(id)
    }

    pub fn middleware(&self, id: &str) -> Option<Arc<dyn Middleware>> {
        self.inner.middleware.lock().get(id).cloned()
    }

    /// Submit resources as one batch
    ///
    /// `on_complete` receives the resources in submission order once all of
    /// them have settled. Fails with `InvalidGroup` if `entries` is empty.
    pub fn add_batch(
        &self,
        entries: Vec<ResourceEntry>,
        on_complete: impl FnOnce(Vec<Arc<Resource>>) + Send + 'static,
    ) -> Result<BatchHandle> {
        self.submit(entries, None, None, Some(Box::new(on_complete)))
    }

    /// Submit resources as one batch identified by `key`
    pub fn add_keyed(&self, key: impl Into<String>, entries: Vec<ResourceEntry>) -> Result<BatchHandle> {
        self.submit(entries, Some(key.into()), None, None)
    }

    /// Add through the middleware registered as `id`
    ///
    /// The middleware picks the resources; its transform output is emitted
    /// on `after` and `on_load_complete` when the batch completes.
    pub fn add_to(&self, id: &str, key: impl Into<String>, args: Vec<Value>) -> Result<BatchHandle> {
        let middleware = self
            .middleware(id)
            .ok_or_else(|| LoaderError::MiddlewareNotFound(id.to_string()))?;
        let key = key.into();
        let entries = middleware.resources(&key, args);
        let stage = Stage {
            id: id.to_string(),
            middleware,
        };
        self.submit(entries, Some(key), Some(stage), None)
    }

    fn submit(
        &self,
        entries: Vec<ResourceEntry>,
        key: Option<String>,
        stage: Option<Stage>,
        on_complete: Option<BatchCallback>,
    ) -> Result<BatchHandle> {
        if entries.is_empty() {
            return Err(LoaderError::InvalidGroup("batch has no resources".to_string()));
        }

        let resources: Vec<Arc<Resource>> = entries.iter().map(|e| e.resource.clone()).collect();
        let tasks = entries.into_iter().map(|entry| self.inner.task(entry)).collect();

        let weak: Weak<LoaderInner> = Arc::downgrade(&self.inner);
        let batch_id: Arc<Mutex<Option<GroupId>>> = Arc::new(Mutex::new(None));
        let group = {
            let batch_id = batch_id.clone();
            let key = key.clone();
            Group::new(tasks, move |results| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Some(batch) = *batch_id.lock() {
                    inner.complete_batch(batch, key, stage, results, on_complete);
                }
            })?
        };

        for resource in &resources {
            self.inner.relay_events(resource);
        }

        // Held across enqueue so a completion racing in from another thread sees the id.
        let id = {
            let mut slot = batch_id.lock();
            let id = self.inner.scheduler.enqueue(group);
            *slot = Some(id);
            id
        };
        tracing::debug!(batch = %id, key = ?key, resources = resources.len(), "batch added");

        Ok(BatchHandle { id, key, resources })
    }

    /// Call `callback` for every resource as it starts loading, during the current run
    pub fn pre(&self, callback: impl Fn(&Arc<Resource>) + Send + Sync + 'static) -> &Self {
        self.inner.pre.subscribe(callback);
        self
    }

    /// Call `callback` for every middleware batch result, during the current run
    pub fn after(&self, callback: impl Fn(&BatchComplete) + Send + Sync + 'static) -> &Self {
        self.inner.after.subscribe(callback);
        self
    }

    /// Start loading; `on_finished` runs once every batch has settled
    pub fn load(&self, on_finished: impl FnOnce() + Send + 'static) -> &Self {
        let on_finished = Mutex::new(Some(on_finished));
        self.inner.on_complete.subscribe_once(move |_| {
            if let Some(on_finished) = on_finished.lock().take() {
                on_finished();
            }
        });

        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.run(move || {
            if let Some(inner) = weak.upgrade() {
                inner.finish_run();
            }
        });
        self
    }

    /// Start loading and wait until every batch has settled
    pub async fn load_all(&self) {
        let done = Arc::new(Promise::new());
        let resolver = done.clone();
        self.load(move || {
            resolver.resolve(());
        });
        done.wait().await;
    }

    /// Cancel batches; in-flight members keep running
    pub fn cancel(&self, batches: &[&BatchHandle]) -> usize {
        let ids: Vec<GroupId> = batches.iter().map(|b| b.id).collect();
        self.inner.scheduler.cancel(&ids)
    }

    pub fn pause(&self) {
        self.inner.scheduler.pause();
    }

    pub fn resume(&self) {
        self.inner.scheduler.resume();
    }

    pub fn is_idle(&self) -> bool {
        self.inner.scheduler.is_idle()
    }

    pub fn on_progress(&self) -> &Signal<ProgressEvent> {
        &self.inner.on_progress
    }

    pub fn on_load_start(&self) -> &Signal<LoadStartEvent> {
        &self.inner.on_load_start
    }

    pub fn on_load_complete(&self) -> &Signal<BatchComplete> {
        &self.inner.on_load_complete
    }

    pub fn on_error(&self) -> &Signal<ErrorEvent> {
        &self.inner.on_error
    }

    pub fn on_complete(&self) -> &Signal<()> {
        &self.inner.on_complete
    }

    /// Remove a listener from the `complete` signal
    pub fn unsubscribe_complete(&self, id: SubscriptionId) -> bool {
        self.inner.on_complete.unsubscribe(id)
    }
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("config", &self.inner.config)
            .field("scheduler", &self.inner.scheduler)
            .field("middleware", &self.inner.middleware.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::loader::middleware::ImageLoader;
    use crate::resource::{LoadRequest, MockFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(url: &str) -> ResourceEntry {
        ResourceEntry::from_request(&LoadRequest::new(url))
    }

    fn loader(fetcher: MockFetcher, config: LoaderConfig) -> ResourceLoader {
        ResourceLoader::with_fetcher(config, Arc::new(fetcher))
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert!(!config.settle_on_error);
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn test_loader_config_builder() {
        let config = LoaderConfig::default()
            .with_concurrency(3)
            .with_settle_on_error(true)
            .with_default_timeout(Some(Duration::from_secs(1)));
        assert_eq!(config.concurrency, 3);
        assert!(config.settle_on_error);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_empty_batch_rejected_without_state_change() {
        let loader = loader(MockFetcher::new(), LoaderConfig::default());
        let result = loader.add_batch(vec![], |_| {});

        assert!(matches!(result, Err(LoaderError::InvalidGroup(_))));
        assert!(loader.is_idle());
        assert_eq!(loader.scheduler().active_groups(), 0);
    }

    #[test]
    fn test_unknown_middleware() {
        let loader = loader(MockFetcher::new(), LoaderConfig::default());
        let result = loader.add_to("images", "logo", vec![]);
        assert!(matches!(result, Err(LoaderError::MiddlewareNotFound(_))));
    }

    #[test]
    fn test_middleware_registry() {
        let loader = loader(MockFetcher::new(), LoaderConfig::default());
        loader.add_middleware("images", Arc::new(ImageLoader));
        assert!(loader.middleware("images").is_some());
        assert!(loader.remove_middleware("images").is_some());
        assert!(loader.middleware("images").is_none());
    }

    #[tokio::test]
    async fn test_batch_results_in_submission_order() {
        let fetcher = MockFetcher::new()
            .with_body("http://localhost/a", 30, "A")
            .with_body("http://localhost/b", 10, "B");
        let loader = loader(fetcher, LoaderConfig::default());

        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        loader
            .add_batch(vec![entry("http://localhost/a"), entry("http://localhost/b")], move |resources| {
                *o.lock() = resources.iter().filter_map(|r| r.url()).collect();
            })
            .unwrap();

        loader.load_all().await;

        assert_eq!(
            *order.lock(),
            vec!["http://localhost/a".to_string(), "http://localhost/b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_middleware_batch_emits_after_and_load_complete() {
        let fetcher = MockFetcher::new().with_body("http://localhost/notes.txt", 5, "notes");
        let loader = loader(fetcher, LoaderConfig::default());
        loader.add_middleware("text", Arc::new(DefaultMiddleware));

        let after = Arc::new(Mutex::new(Vec::new()));
        let a = after.clone();
        loader.after(move |event| a.lock().push(event.clone()));

        let completed = Arc::new(AtomicUsize::new(0));
        let c = completed.clone();
        loader.on_load_complete().subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        loader
            .add_to("text", "notes", vec![serde_json::json!("http://localhost/notes.txt")])
            .unwrap();
        loader.load_all().await;

        let after = after.lock();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].key.as_deref(), Some("notes"));
        assert_eq!(after[0].middleware.as_deref(), Some("text"));
        assert_eq!(after[0].data, vec![serde_json::json!("notes")]);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_scoped_listeners_removed_after_run() {
        let fetcher = MockFetcher::new()
            .with_body("http://localhost/a", 1, "a")
            .with_body("http://localhost/b", 1, "b");
        let loader = loader(fetcher, LoaderConfig::default());

        let pre = Arc::new(AtomicUsize::new(0));
        let p = pre.clone();
        loader.pre(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        loader.add_keyed("first", vec![entry("http://localhost/a")]).unwrap();
        loader.load_all().await;
        assert_eq!(pre.load(Ordering::SeqCst), 1);

        loader.add_keyed("second", vec![entry("http://localhost/b")]).unwrap();
        loader.load_all().await;
        assert_eq!(pre.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_relayed_and_batch_stalls_by_default() {
        let fetcher = MockFetcher::new().with_error("http://localhost/bad", 1, LoadError::Network("down".to_string()));
        let loader = loader(fetcher, LoaderConfig::default());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        loader.on_error().subscribe(move |event| e.lock().push(event.error.clone()));

        let handle = loader.add_keyed("bad", vec![entry("http://localhost/bad")]).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let f = finished.clone();
        loader.load(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        handle.resources()[0].failed().wait().await;
        tokio::task::yield_now().await;

        assert_eq!(*errors.lock(), vec![LoadError::Network("down".to_string())]);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(loader.scheduler().in_flight(), 1);
        assert!(!loader.is_idle());
    }

    #[tokio::test]
    async fn test_settle_on_error_completes_batch() {
        let fetcher = MockFetcher::new()
            .with_error("http://localhost/bad", 1, LoadError::Network("down".to_string()))
            .with_body("http://localhost/good", 2, "good");
        let loader = loader(fetcher, LoaderConfig::default().with_settle_on_error(true));

        let results = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        loader
            .add_batch(vec![entry("http://localhost/bad"), entry("http://localhost/good")], move |resources| {
                *r.lock() = resources.iter().map(|res| res.payload().is_some()).collect();
            })
            .unwrap();
        loader.load_all().await;

        assert_eq!(*results.lock(), vec![false, true]);
        assert!(loader.is_idle());
    }
}
