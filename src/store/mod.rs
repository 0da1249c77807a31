//! In-memory record tables standing in for a persistence layer.
//!
//! Each table hands out monotonically increasing ids and keeps rows ordered
//! by id. Compound check-then-write operations take the write guard directly
//! so the check and the write happen under one lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type Rows<T> = BTreeMap<u64, T>;

#[derive(Debug)]
pub struct Table<T> {
    rows: Arc<RwLock<Rows<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<T: Clone> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id without inserting anything.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert_with(&self, build: impl FnOnce(u64) -> T) -> T {
        let id = self.allocate_id();
        let row = build(id);
        self.rows.write().await.insert(id, row.clone());
        row
    }

    pub async fn get(&self, id: u64) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| pred(row))
            .cloned()
            .collect()
    }

    pub async fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.rows.read().await.values().find(|row| pred(row)).cloned()
    }

    pub async fn count(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.rows.read().await.values().filter(|row| pred(row)).count()
    }

    /// Apply `f` to the row under the write lock; `None` if the id is unknown.
    pub async fn update<R>(&self, id: u64, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.rows.write().await.get_mut(&id).map(f)
    }

    pub async fn remove(&self, id: u64) -> Option<T> {
        self.rows.write().await.remove(&id)
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Rows<T>> {
        self.rows.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Rows<T>> {
        self.rows.write().await
    }
}
