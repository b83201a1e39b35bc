//! Debounce-by-key task scheduler
//!
//! Scheduling a delayed task under a key cancels any task still pending
//! under the same key, so repeated triggers collapse into the last one.
//! Used for the play-dispatch debounce, radio refills, renderer enqueue
//! retries and the end-of-queue grace timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Keyed delayed-task scheduler with cancel-and-replace semantics
#[derive(Clone, Default)]
pub struct TaskScheduler {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` after `delay`, cancelling any pending task under `key`.
    pub fn call_later<F>(&self, key: impl Into<String>, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let tasks = Arc::clone(&self.tasks);
        let handle_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
            // drop our own entry so the map does not accumulate handles
            if let Ok(mut map) = tasks.lock() {
                if map.get(&handle_key).map(|h| h.is_finished()).unwrap_or(false) {
                    map.remove(&handle_key);
                }
            }
        });

        let mut map = self.tasks.lock().expect("scheduler mutex poisoned");
        if let Some(previous) = map.insert(key.clone(), handle) {
            trace!(key, "replacing pending scheduled task");
            previous.abort();
        }
    }

    /// Cancel a pending task under `key`, if any.
    pub fn cancel(&self, key: &str) {
        let mut map = self.tasks.lock().expect("scheduler mutex poisoned");
        if let Some(handle) = map.remove(key) {
            handle.abort();
        }
    }

    /// Cancel everything (shutdown path).
    pub fn cancel_all(&self) {
        let mut map = self.tasks.lock().expect("scheduler mutex poisoned");
        for (_, handle) in map.drain() {
            handle.abort();
        }
    }
}
