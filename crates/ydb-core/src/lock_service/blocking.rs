// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, instrument, trace};
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::fp_ensure;
use ydb_types::messages::LockStatus;

use super::LockServiceApi;

#[cfg(test)]
#[path = "../unit_tests/blocking_lock_service_tests.rs"]
mod blocking_lock_service_tests;

#[derive(Default)]
struct BlockingLock {
    holder: Option<ClientId>,
    freed: Arc<Notify>,
}

/// Lock service for clients that do not cache locks.
///
/// `acquire` does not return until the lock is granted. Waiters for a lock
/// are woken one at a time as it is released.
#[derive(Default)]
pub struct BlockingLockService {
    locks: Mutex<HashMap<LockId, BlockingLock>>,
}

impl BlockingLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_grant(&self, client_id: &ClientId, lock_id: LockId) -> bool {
        let mut locks = self.locks.lock();
        let lock = locks.entry(lock_id).or_default();
        if lock.holder.is_none() {
            lock.holder = Some(client_id.clone());
            true
        } else {
            false
        }
    }

    fn freed(&self, lock_id: LockId) -> Arc<Notify> {
        self.locks.lock().entry(lock_id).or_default().freed.clone()
    }
}

#[async_trait]
impl LockServiceApi for BlockingLockService {
    #[instrument(level = "trace", skip_all, fields(client = %client_id, lock_id = lock_id))]
    async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<LockStatus> {
        let freed = self.freed(lock_id);
        loop {
            let notified = freed.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.try_grant(client_id, lock_id) {
                debug!(client = %client_id, lock_id, "Granted lock");
                return Ok(LockStatus::Granted);
            }
            trace!(client = %client_id, lock_id, "Waiting for lock");
            notified.await;
        }
    }

    #[instrument(level = "trace", skip_all, fields(client = %client_id, lock_id = lock_id))]
    async fn release(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        let mut locks = self.locks.lock();
        let Some(lock) = locks.get_mut(&lock_id) else {
            return Ok(());
        };
        let Some(holder) = &lock.holder else {
            return Ok(());
        };
        fp_ensure!(
            holder == client_id,
            YdbError::LockNotHeld {
                lock_id,
                client_id: client_id.clone(),
            }
        );
        lock.holder = None;
        lock.freed.notify_one();
        debug!(client = %client_id, lock_id, "Released lock");
        Ok(())
    }

    async fn stat(&self, lock_id: LockId) -> YdbResult<i32> {
        Ok(self
            .locks
            .lock()
            .get(&lock_id)
            .map_or(0, |lock| lock.holder.is_some() as i32))
    }
}
