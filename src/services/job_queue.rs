//! Debounced in-memory intake queue
//!
//! Callers enqueue work items keyed by a configured function. Repeated
//! requests for the same key collapse into one pending item carrying the
//! latest payload. A consumer periodically drains the whole backlog.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Configuration for a [JobQueue]
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Name used in logs
    pub name: String,
    /// Window within which a re-enqueued key keeps its original enqueue instant
    pub debounce: Duration,
    /// When set, [JobQueue::queue] drops everything
    pub disabled: bool,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            name: "job-queue".to_string(),
            debounce: Duration::from_secs(5 * 60),
            disabled: false,
        }
    }
}

struct PendingItem<T> {
    item: T,
    queued_at: Instant,
}

type KeyFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Keyed, coalescing work queue
pub struct JobQueue<T> {
    config: JobQueueConfig,
    key_fn: KeyFn<T>,
    pending: Mutex<HashMap<String, PendingItem<T>>>,
    len: AtomicUsize,
}

impl<T: Send> JobQueue<T> {
    pub fn new<F>(config: JobQueueConfig, key_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            config,
            key_fn: Box::new(key_fn),
            pending: Mutex::new(HashMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue an item, replacing any pending item with the same key
    pub fn queue(&self, item: T) {
        if self.config.disabled {
            return;
        }

        let key = (self.key_fn)(&item);
        let now = Instant::now();

        let mut pending = self.pending.lock();
        let queued_at = match pending.get(&key) {
            Some(existing) if now.duration_since(existing.queued_at) < self.config.debounce => {
                existing.queued_at
            }
            _ => now,
        };

        debug!(queue = %self.config.name, key = %key, "Item queued");
        pending.insert(key, PendingItem { item, queued_at });
        self.len.store(pending.len(), Ordering::Release);
    }

    /// Lock-free check for pending work
    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Take the entire backlog and hand each item to `f`, oldest first.
    ///
    /// Failed items are logged and dropped. Returns the number of items taken.
    pub async fn process<F, Fut>(&self, mut f: F) -> usize
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut items: Vec<(String, PendingItem<T>)> = {
            let mut pending = self.pending.lock();
            let drained = pending.drain().collect();
            self.len.store(0, Ordering::Release);
            drained
        };
        items.sort_by_key(|(_, p)| p.queued_at);

        let count = items.len();
        for (key, pending) in items {
            if let Err(e) = f(pending.item).await {
                warn!(queue = %self.config.name, key = %key, error = %e, "Failed to process queued item");
            }
        }
        count
    }
}

/// Run `processor` over `items` with at most `max_concurrent` in flight.
///
/// Results come back in completion order.
pub async fn process_concurrent<T, F, Fut, R>(
    items: impl IntoIterator<Item = T>,
    max_concurrent: usize,
    processor: F,
) -> Vec<R>
where
    F: Fn(T) -> Fut + Clone,
    Fut: Future<Output = R>,
{
    use futures::stream::{self, StreamExt};

    let max_concurrent = max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    stream::iter(items)
        .map(|item| {
            let sem = semaphore.clone();
            let proc = processor.clone();
            async move {
                let _permit = sem.acquire().await.ok();
                proc(item).await
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await
}
