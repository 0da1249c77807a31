use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Opaque handle → signed token mapping with per-key expiry.
///
/// Absence is a normal outcome: `get` returns `None` for unknown and expired
/// handles alike, and `delete` never fails.
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, handle: &str, token: &str, ttl: Duration);

    async fn get(&self, handle: &str) -> Option<String>;

    /// Remove a mapping. Returns `true` only if a live entry was removed.
    async fn delete(&self, handle: &str) -> bool;

    /// Drop expired entries, returning how many were removed.
    async fn purge_expired(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local store. Expiry is checked on every read and swept
/// periodically by [`spawn_sweeper`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn put(&self, handle: &str, token: &str, ttl: Duration) {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        map.insert(
            handle.to_string(),
            Entry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    async fn get(&self, handle: &str) -> Option<String> {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        match map.get(handle) {
            Some(entry) if entry.is_live(now) => Some(entry.token.clone()),
            Some(_) => {
                map.remove(handle);
                None
            }
            None => None,
        }
    }

    async fn delete(&self, handle: &str) -> bool {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        map.remove(handle).is_some_and(|entry| entry.is_live(now))
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, entry| entry.is_live(now));
        before - map.len()
    }
}

/// Background task that evicts expired handles on a fixed interval.
pub fn spawn_sweeper(
    store: Arc<dyn CredentialStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                debug!(removed, "Evicted expired credential handles");
            }
        }
    })
}
