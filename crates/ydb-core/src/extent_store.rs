// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;
use ydb_types::base_types::{ExtentAttr, ExtentId, ExtentKind, KEY_TABLE_SIZE};
use ydb_types::error::{YdbError, YdbResult};

#[cfg(test)]
#[path = "unit_tests/extent_store_tests.rs"]
mod extent_store_tests;

/// Byte-blob store addressed by extent id.
///
/// The store has no concurrency control of its own: callers serialize
/// conflicting writers through the lock service.
#[async_trait]
pub trait ExtentStore: Send + Sync {
    /// Allocate a fresh, empty extent.
    async fn create(&self, kind: ExtentKind) -> YdbResult<ExtentId>;

    async fn get(&self, id: ExtentId) -> YdbResult<Vec<u8>>;

    async fn get_attr(&self, id: ExtentId) -> YdbResult<ExtentAttr>;

    /// Replace the content of `id`, creating a file extent if there is none.
    async fn put(&self, id: ExtentId, data: Vec<u8>) -> YdbResult;

    async fn remove(&self, id: ExtentId) -> YdbResult;
}

struct Extent {
    data: Vec<u8>,
    attr: ExtentAttr,
}

impl Extent {
    fn new(kind: ExtentKind) -> Self {
        let now = now_secs();
        Self {
            data: Vec::new(),
            attr: ExtentAttr {
                kind,
                size: 0,
                atime: now,
                mtime: now,
                ctime: now,
            },
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Process-local extent store.
///
/// Ids handed out by `create` start above the key table so they never alias
/// a hashed key slot.
pub struct InMemoryExtentStore {
    extents: Mutex<BTreeMap<ExtentId, Extent>>,
    next_id: AtomicU64,
}

impl Default for InMemoryExtentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExtentStore {
    pub fn new() -> Self {
        Self {
            extents: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(KEY_TABLE_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.extents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.lock().is_empty()
    }
}

#[async_trait]
impl ExtentStore for InMemoryExtentStore {
    async fn create(&self, kind: ExtentKind) -> YdbResult<ExtentId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.extents.lock().insert(id, Extent::new(kind));
        trace!(extent_id = id, ?kind, "Created extent");
        Ok(id)
    }

    async fn get(&self, id: ExtentId) -> YdbResult<Vec<u8>> {
        let mut extents = self.extents.lock();
        let extent = extents
            .get_mut(&id)
            .ok_or(YdbError::ExtentNotFound { extent_id: id })?;
        extent.attr.atime = now_secs();
        Ok(extent.data.clone())
    }

    async fn get_attr(&self, id: ExtentId) -> YdbResult<ExtentAttr> {
        self.extents
            .lock()
            .get(&id)
            .map(|extent| extent.attr)
            .ok_or(YdbError::ExtentNotFound { extent_id: id })
    }

    async fn put(&self, id: ExtentId, data: Vec<u8>) -> YdbResult {
        let mut extents = self.extents.lock();
        let extent = extents
            .entry(id)
            .or_insert_with(|| Extent::new(ExtentKind::File));
        let now = now_secs();
        extent.attr.size = data.len() as u64;
        extent.attr.mtime = now;
        extent.attr.ctime = now;
        extent.data = data;
        trace!(extent_id = id, size = extent.attr.size, "Put extent");
        Ok(())
    }

    async fn remove(&self, id: ExtentId) -> YdbResult {
        self.extents
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(YdbError::ExtentNotFound { extent_id: id })
    }
}
