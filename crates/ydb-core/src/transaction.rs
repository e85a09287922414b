// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tracing::warn;
use ydb_types::base_types::{LockId, TransactionId, BOOKKEEPING_LOCK_ID};
use ydb_types::error::YdbResult;

use crate::lock_client::LockClient;

/// Serializable transactions over the key/value store.
///
/// `get` and `set` on a transaction that is unknown or no longer started
/// fail with `InvalidTransaction`. A conflict ends the transaction with
/// `TransactionAborted`; after that only `abort` is accepted, as a no-op.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    async fn begin(&self) -> YdbResult<TransactionId>;

    async fn commit(&self, transaction_id: TransactionId) -> YdbResult;

    async fn abort(&self, transaction_id: TransactionId) -> YdbResult;

    async fn get(&self, transaction_id: TransactionId, key: &str) -> YdbResult<Vec<u8>>;

    async fn set(&self, transaction_id: TransactionId, key: &str, value: Vec<u8>) -> YdbResult;

    async fn del(&self, transaction_id: TransactionId, key: &str) -> YdbResult {
        self.set(transaction_id, key, Vec::new()).await
    }
}

/// Coordinator state guarded by the reserved bookkeeping lock.
///
/// The lock goes through the lock client so that coordinators sharing a lock
/// service exclude each other too. The inner mutex is only ever taken while
/// the bookkeeping lock is held.
pub struct Bookkeeping<T> {
    locks: Arc<dyn LockClient>,
    state: Mutex<T>,
}

impl<T: Send> Bookkeeping<T> {
    pub fn new(locks: Arc<dyn LockClient>, state: T) -> Self {
        Self {
            locks,
            state: Mutex::new(state),
        }
    }

    pub fn locks(&self) -> &Arc<dyn LockClient> {
        &self.locks
    }

    /// Run `f` on the state under the bookkeeping lock.
    pub async fn with<F, R>(&self, f: F) -> YdbResult<R>
    where
        F: FnOnce(&mut T) -> R + Send,
        R: Send,
    {
        self.locks.acquire(BOOKKEEPING_LOCK_ID).await?;
        let result = f(&mut self.state.lock());
        self.locks.release(BOOKKEEPING_LOCK_ID).await?;
        Ok(result)
    }

    /// Take the bookkeeping lock for a section that awaits in between state
    /// accesses. The caller must `exit` the returned guard.
    pub async fn enter(&self) -> YdbResult<BookkeepingGuard<'_, T>> {
        self.locks.acquire(BOOKKEEPING_LOCK_ID).await?;
        Ok(BookkeepingGuard { books: self })
    }

    /// Release every lock in `lock_ids`, reporting the first failure.
    pub async fn release_all(&self, lock_ids: BTreeSet<LockId>) -> YdbResult {
        let mut result = Ok(());
        for lock_id in lock_ids {
            if let Err(error) = self.locks.release(lock_id).await {
                warn!(lock_id, %error, "Failed to release lock");
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }
}

pub struct BookkeepingGuard<'a, T> {
    books: &'a Bookkeeping<T>,
}

impl<T: Send> BookkeepingGuard<'_, T> {
    /// Must not be held across an await point.
    pub fn state(&self) -> MutexGuard<'_, T> {
        self.books.state.lock()
    }

    pub async fn exit(self) -> YdbResult {
        self.books.locks.release(BOOKKEEPING_LOCK_ID).await
    }
}
