//! Collapses identical in-flight top-up submissions onto one provider call.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::{Currency, Money};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::time::Instant;

/// Identity of a top-up submission as the provider would see it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopUpKey {
    pub phone: String,
    pub operator_id: String,
    pub amount: Money,
    pub currency: Currency,
}

struct Entry<V: Clone> {
    inserted_at: Instant,
    future: Shared<BoxFuture<'static, V>>,
}

/// Maps a key to the eventual result of the first call made for it.
///
/// A caller arriving within `window` of the first call awaits that call's
/// result instead of starting a new one. Entries are evicted once the window
/// has elapsed, whatever the outcome. Eviction is lazy: expired entries are
/// dropped on the next access.
#[derive(Clone)]
pub struct DeduplicationCache<K, V: Clone> {
    window: Duration,
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> DeduplicationCache<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `make()` for `key`, or joins the call already made for it.
    ///
    /// `make` is only invoked on a miss. The returned future is shared, so it
    /// keeps making progress as long as any caller is awaiting it.
    pub async fn run<F>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let future = {
            let mut entries = self.lock();
            let now = Instant::now();
            entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.window);

            match entries.get(&key) {
                Some(entry) => {
                    metrics::counter!("dedup_cache_hits_total").increment(1);
                    tracing::debug!("joining in-flight call");
                    entry.future.clone()
                }
                None => {
                    let future = make().shared();
                    entries.insert(
                        key,
                        Entry {
                            inserted_at: now,
                            future: future.clone(),
                        },
                    );
                    future
                }
            }
        };

        future.await
    }

    /// Number of live entries, including any not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry older than the window.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock()
            .retain(|_, entry| now.duration_since(entry.inserted_at) < self.window);
    }
}
