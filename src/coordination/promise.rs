//! Single-resolution completion primitive
//!
//! A `Promise` resolves at most once. Callbacks attached with `then` run
//! exactly once, immediately if the value is already there. Async callers
//! can `wait` for the value instead.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;

type Continuation<T> = Box<dyn FnOnce(&T) + Send>;

struct PromiseState<T> {
    value: Option<T>,
    continuations: Vec<Continuation<T>>,
}

/// A value that becomes available once
pub struct Promise<T> {
    state: Mutex<PromiseState<T>>,
    watch: watch::Sender<Option<T>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an unresolved promise
    pub fn new() -> Self {
        let (watch, _) = watch::channel(None);
        Self {
            state: Mutex::new(PromiseState {
                value: None,
                continuations: Vec::new(),
            }),
            watch,
        }
    }

    /// Resolve with `value`
    ///
    /// Returns false, leaving the first value in place, if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.continuations)
        };

        for continuation in continuations {
            continuation(&value);
        }
        self.watch.send_replace(Some(value));
        true
    }

    /// Run `continuation` once the promise resolves
    pub fn then(&self, continuation: impl FnOnce(&T) + Send + 'static) {
        let resolved = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => Some(value.clone()),
                None => {
                    state.continuations.push(Box::new(continuation));
                    return;
                }
            }
        };

        if let Some(value) = resolved {
            continuation(&value);
        }
    }

    /// Whether the promise has resolved
    pub fn is_resolved(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// The resolved value, if any
    pub fn value(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Wait until the promise resolves
    pub async fn wait(&self) -> T {
        let mut rx = self.watch.subscribe();
        // The sender lives in `self`, so the channel cannot close while borrowed.
        let value = rx.wait_for(Option::is_some).await.ok().and_then(|v| v.clone());
        match value {
            Some(value) => value,
            None => std::future::pending().await,
        }
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.state.lock().value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_resolve_once() {
        let promise = Promise::new();
        assert!(!promise.is_resolved());
        assert!(promise.resolve(1));
        assert!(!promise.resolve(2));
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_then_before_resolve() {
        let promise = Promise::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        promise.then(move |v: &usize| {
            c.fetch_add(*v, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        promise.resolve(5);
        promise.resolve(9);
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_then_after_resolve_runs_immediately() {
        let promise = Promise::new();
        promise.resolve("done".to_string());

        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        promise.then(move |v| *s.lock() = Some(v.clone()));

        assert_eq!(seen.lock().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_wait_already_resolved() {
        let promise = Promise::new();
        promise.resolve(3u8);
        assert_eq!(promise.wait().await, 3);
    }

    #[tokio::test]
    async fn test_wait_resolved_later() {
        let promise = Arc::new(Promise::new());

        let p = promise.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            p.resolve(42u32);
        });

        assert_eq!(promise.wait().await, 42);
    }
}
