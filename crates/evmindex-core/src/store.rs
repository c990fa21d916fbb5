//! Storage port: an ordered, byte-keyed store with atomic batch writes.
//!
//! The index only needs point reads, bounded forward/reverse scans, and an
//! all-or-nothing batch commit. Backends live in `evmindex-storage`; the
//! in-memory store here is the reference implementation used by tests and
//! ephemeral indexers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("{0}")]
    Backend(String),
}

/// Scan direction for [`KvStore::scan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// A key/value pair returned by a scan.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Staged writes, applied atomically by [`KvStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<KvPair>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `key → value`. A later set of the same key wins.
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((key.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<KvPair> {
        self.ops
    }
}

/// Trait for ordered key-value backends.
///
/// Implementations include [`MemoryKvStore`] and `SqliteKvStore`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Point read.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Entries with `start <= key < end`, in byte order (or reversed), at most
    /// `limit` of them.
    async fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError>;

    /// Apply every write in `batch`, or none of them.
    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Release the backend. Any later call returns [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

// ─── In-memory store ─────────────────────────────────────────────────────────

/// In-memory ordered store. All data is lost when it is dropped.
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`KvStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("memory store lock poisoned".into())
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_open()?;
        Ok(self.data.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        direction: ScanDirection,
        limit: Option<usize>,
    ) -> Result<Vec<KvPair>, StoreError> {
        self.ensure_open()?;
        if start >= end {
            return Ok(vec![]);
        }
        let data = self.data.read().map_err(poisoned)?;
        let range = data.range::<[u8], _>((
            std::ops::Bound::Included(start),
            std::ops::Bound::Excluded(end),
        ));
        let limit = limit.unwrap_or(usize::MAX);
        let pairs = match direction {
            ScanDirection::Forward => range
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ScanDirection::Reverse => range
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(pairs)
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.ensure_open()?;
        // single write lock: readers see either none or all of the batch
        let mut data = self.data.write().map_err(poisoned)?;
        for (key, value) in batch.into_ops() {
            data.insert(key, value);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
