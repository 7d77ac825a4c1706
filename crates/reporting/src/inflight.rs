//! Per-key coalescing of concurrent refreshes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use insight_core::{DashboardError, DashboardResult};
use tracing::{debug, error};

type PendingRefresh<T> = Shared<BoxFuture<'static, DashboardResult<T>>>;

/// Concurrent callers asking for the same key share one in-flight refresh
/// and all observe its result.
///
/// Each refresh runs on its own spawned task, so it completes even when every
/// caller awaiting it is dropped. The task clears its registry entry once it
/// settles and a later call starts a fresh one.
pub struct InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pending: Arc<DashMap<String, (u64, PendingRefresh<T>)>>,
    generation: AtomicU64,
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Join the refresh running under `key`, or spawn one from `start`.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> DashboardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DashboardResult<T>> + Send + 'static,
    {
        let (generation, refresh) = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                metrics::counter!("reporting.refresh_coalesced").increment(1);
                debug!(key, "Joining in-flight refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let refresh = self.spawn(key.to_string(), generation, start());
                entry.insert((generation, refresh.clone()));
                (generation, refresh)
            }
        };

        let result = refresh.await;
        // The task normally clears its own entry. This covers a task that panicked.
        self.pending
            .remove_if(key, |_, (current, _)| *current == generation);
        result
    }

    fn spawn<Fut>(&self, key: String, generation: u64, work: Fut) -> PendingRefresh<T>
    where
        Fut: Future<Output = DashboardResult<T>> + Send + 'static,
    {
        let pending = self.pending.clone();
        let handle = tokio::spawn(async move {
            let result = work.await;
            pending.remove_if(&key, |_, (current, _)| *current == generation);
            result
        });

        async move {
            handle.await.unwrap_or_else(|join_error| {
                error!(error = %join_error, "Refresh task did not complete");
                Err(DashboardError::internal(format!(
                    "refresh task failed: {join_error}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
