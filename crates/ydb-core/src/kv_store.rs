// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;
use ydb_types::base_types::{hash_key, ExtentId};
use ydb_types::error::{YdbError, YdbResult};

use crate::extent_store::ExtentStore;

#[cfg(test)]
#[path = "unit_tests/kv_store_tests.rs"]
mod kv_store_tests;

type Bucket = BTreeMap<String, Vec<u8>>;

/// String-keyed view over an [`ExtentStore`].
///
/// Every key lives in the bucket stored at extent `hash_key(key)`, the same
/// id that names its lock. Keys sharing a slot share the lock and the extent
/// but keep separate values. An absent key reads as the empty value.
#[derive(Clone)]
pub struct KeyValueStore {
    extents: Arc<dyn ExtentStore>,
}

impl KeyValueStore {
    pub fn new(extents: Arc<dyn ExtentStore>) -> Self {
        Self { extents }
    }

    pub fn extents(&self) -> &Arc<dyn ExtentStore> {
        &self.extents
    }

    pub fn slot(key: &str) -> ExtentId {
        hash_key(key)
    }

    pub async fn read(&self, key: &str) -> YdbResult<Vec<u8>> {
        let slot = Self::slot(key);
        let mut bucket = self.load_bucket(slot).await?;
        let value = bucket.remove(key).unwrap_or_default();
        trace!(key, slot, len = value.len(), "Read key");
        Ok(value)
    }

    /// Store `value` under `key`. The empty value deletes the key.
    pub async fn write(&self, key: &str, value: Vec<u8>) -> YdbResult {
        let slot = Self::slot(key);
        let mut bucket = self.load_bucket(slot).await?;
        trace!(key, slot, len = value.len(), "Write key");
        if value.is_empty() {
            if bucket.remove(key).is_none() {
                return Ok(());
            }
        } else {
            bucket.insert(key.to_owned(), value);
        }

        if bucket.is_empty() {
            match self.extents.remove(slot).await {
                Ok(()) | Err(YdbError::ExtentNotFound { .. }) => Ok(()),
                Err(error) => Err(error),
            }
        } else {
            let data = bincode::serialize(&bucket).map_err(|e| YdbError::StorageError {
                error: e.to_string(),
            })?;
            self.extents.put(slot, data).await
        }
    }

    async fn load_bucket(&self, slot: ExtentId) -> YdbResult<Bucket> {
        let data = match self.extents.get(slot).await {
            Ok(data) => data,
            Err(YdbError::ExtentNotFound { .. }) => return Ok(Bucket::new()),
            Err(error) => return Err(error),
        };
        if data.is_empty() {
            return Ok(Bucket::new());
        }
        bincode::deserialize(&data).map_err(|e| YdbError::StorageError {
            error: format!("corrupt bucket in extent {slot}: {e}"),
        })
    }
}
