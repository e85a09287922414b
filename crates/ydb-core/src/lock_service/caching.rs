// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::fp_ensure;
use ydb_types::messages::{CallbackKind, LockStatus};

use super::LockServiceApi;
use crate::callback::CallbackRouter;

#[cfg(test)]
#[path = "../unit_tests/caching_lock_service_tests.rs"]
mod caching_lock_service_tests;

#[derive(Default)]
struct CachedLock {
    holder: Option<ClientId>,
    waiters: VecDeque<ClientId>,
    /// A revoke went out to the current holder.
    revoke_sent: bool,
}

/// Point-in-time view of one lock, for tests and diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    pub holder: Option<ClientId>,
    pub waiters: Vec<ClientId>,
    pub revoke_sent: bool,
}

/// Lock service for caching clients.
///
/// `acquire` never blocks. A busy lock answers `Retry`, queues the caller and
/// asks the holder, once, to give the lock back. A release hands the queue
/// head a `retry` signal; the lock is not re-granted implicitly.
///
/// Callbacks are delivered after the state table is unlocked. A failed
/// delivery is logged and not retried.
pub struct CachingLockService {
    locks: Mutex<BTreeMap<LockId, CachedLock>>,
    callbacks: Arc<dyn CallbackRouter>,
}

impl CachingLockService {
    pub fn new(callbacks: Arc<dyn CallbackRouter>) -> Self {
        Self {
            locks: Mutex::new(BTreeMap::new()),
            callbacks,
        }
    }

    pub fn snapshot(&self, lock_id: LockId) -> LockSnapshot {
        self.locks
            .lock()
            .get(&lock_id)
            .map(|lock| LockSnapshot {
                holder: lock.holder.clone(),
                waiters: lock.waiters.iter().cloned().collect(),
                revoke_sent: lock.revoke_sent,
            })
            .unwrap_or_default()
    }

    /// Verify that no lock has a revoke pending without a holder and that no
    /// client is queued twice or queued behind itself.
    pub fn check(&self) -> bool {
        let locks = self.locks.lock();
        let mut ok = true;
        for (lock_id, lock) in locks.iter() {
            if lock.revoke_sent && lock.holder.is_none() {
                warn!(lock_id, "Revoke pending on a free lock");
                ok = false;
            }
            if !lock.waiters.iter().all_unique() {
                warn!(lock_id, waiters = ?lock.waiters, "Client queued twice");
                ok = false;
            }
            if let Some(holder) = &lock.holder {
                if lock.waiters.contains(holder) {
                    warn!(lock_id, %holder, "Holder is also queued");
                    ok = false;
                }
            }
        }
        ok
    }

    async fn send_revoke(&self, holder: ClientId, lock_id: LockId) {
        if let Err(error) = self
            .callbacks
            .deliver(&holder, CallbackKind::Revoke, lock_id)
            .await
        {
            warn!(client = %holder, lock_id, %error, "Revoke delivery failed");
            // Let the next contender try again.
            let mut locks = self.locks.lock();
            if let Some(lock) = locks.get_mut(&lock_id) {
                if lock.holder.as_ref() == Some(&holder) {
                    lock.revoke_sent = false;
                }
            }
        }
    }
}

#[async_trait]
impl LockServiceApi for CachingLockService {
    #[instrument(level = "trace", skip_all, fields(client = %client_id, lock_id = lock_id))]
    async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<LockStatus> {
        let (status, revoke_to) = {
            let mut locks = self.locks.lock();
            let lock = locks.entry(lock_id).or_default();
            match &lock.holder {
                None => {
                    lock.holder = Some(client_id.clone());
                    lock.waiters.retain(|waiter| waiter != client_id);
                    lock.revoke_sent = !lock.waiters.is_empty();
                    debug!(client = %client_id, lock_id, waiters = lock.waiters.len(), "Granted lock");
                    // Others are already queued: ask for it back straight away.
                    let revoke_to = lock.revoke_sent.then(|| client_id.clone());
                    (LockStatus::Granted, revoke_to)
                }
                Some(holder) if holder == client_id => (LockStatus::Granted, None),
                Some(holder) => {
                    let holder = holder.clone();
                    if !lock.waiters.contains(client_id) {
                        lock.waiters.push_back(client_id.clone());
                    }
                    let revoke_to = (!lock.revoke_sent).then_some(holder);
                    lock.revoke_sent = true;
                    debug!(client = %client_id, lock_id, waiters = lock.waiters.len(), "Lock busy");
                    (LockStatus::Retry, revoke_to)
                }
            }
        };

        if let Some(holder) = revoke_to {
            self.send_revoke(holder, lock_id).await;
        }
        Ok(status)
    }

    #[instrument(level = "trace", skip_all, fields(client = %client_id, lock_id = lock_id))]
    async fn release(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        {
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
            lock.revoke_sent = false;
            debug!(client = %client_id, lock_id, waiters = lock.waiters.len(), "Released lock");
        }

        // Wake the queue head. A client we cannot reach is skipped.
        loop {
            let next = {
                let mut locks = self.locks.lock();
                match locks.get_mut(&lock_id) {
                    Some(lock) if lock.holder.is_none() => lock.waiters.pop_front(),
                    _ => None,
                }
            };
            let Some(next) = next else {
                return Ok(());
            };
            match self
                .callbacks
                .deliver(&next, CallbackKind::Retry, lock_id)
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(client = %next, lock_id, %error, "Retry delivery failed");
                }
            }
        }
    }

    async fn stat(&self, lock_id: LockId) -> YdbResult<i32> {
        Ok(self
            .locks
            .lock()
            .get(&lock_id)
            .map_or(0, |lock| lock.holder.is_some() as i32))
    }
}
