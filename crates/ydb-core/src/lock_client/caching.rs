// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, instrument, trace, warn};
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::YdbResult;
use ydb_types::messages::LockStatus;

use super::{LockClient, LockReleaseObserver};
use crate::callback::LockCallbackHandler;
use crate::lock_service::LockServiceApi;

#[cfg(test)]
#[path = "../unit_tests/caching_lock_client_tests.rs"]
mod caching_lock_client_tests;

/// Local view of one lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheState {
    /// Not held by this process.
    #[default]
    None,
    /// Held by this process and not in use by any local task.
    Free,
    /// An `acquire` request is outstanding.
    Acquiring,
    /// Held and in use by one local task.
    Locked,
    /// A `release` request is outstanding.
    Releasing,
}

#[derive(Default)]
struct CacheEntry {
    state: CacheState,
    revoke_received: bool,
    retry_received: bool,
    /// Signalled when the entry moves to `Free` or `None`.
    free: Arc<Notify>,
    /// Signalled when a `retry` arrives.
    retry: Arc<Notify>,
}

enum Next {
    Done,
    Request,
    Wait,
}

/// Lock client that keeps granted locks until the service revokes them.
///
/// Local tasks hand a cached lock to each other without contacting the
/// service. Only one `acquire` request per lock is outstanding at any time.
/// A revoke never interrupts a task holding the lock: it is honoured at the
/// next local release.
pub struct CachingLockClient {
    client_id: ClientId,
    service: Arc<dyn LockServiceApi>,
    observer: Option<Arc<dyn LockReleaseObserver>>,
    entries: Mutex<HashMap<LockId, CacheEntry>>,
}

impl CachingLockClient {
    pub fn new(client_id: ClientId, service: Arc<dyn LockServiceApi>) -> Self {
        Self {
            client_id,
            service,
            observer: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockReleaseObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self, lock_id: LockId) -> CacheState {
        self.entries
            .lock()
            .get(&lock_id)
            .map_or(CacheState::None, |entry| entry.state)
    }

    fn notifiers(&self, lock_id: LockId) -> (Arc<Notify>, Arc<Notify>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(lock_id).or_default();
        (entry.free.clone(), entry.retry.clone())
    }

    fn set_state(&self, lock_id: LockId, state: CacheState) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(lock_id).or_default();
        entry.state = state;
        if matches!(state, CacheState::None | CacheState::Free) {
            entry.free.notify_one();
        }
    }

    /// Runs with the entry in `Acquiring` until the service grants the lock.
    async fn request(&self, lock_id: LockId, retry: &Notify) -> YdbResult {
        loop {
            let status = match self.service.acquire(&self.client_id, lock_id).await {
                Ok(status) => status,
                Err(error) => {
                    self.set_state(lock_id, CacheState::None);
                    return Err(error);
                }
            };
            if status == LockStatus::Granted {
                self.set_state(lock_id, CacheState::Locked);
                debug!(client = %self.client_id, lock_id, "Lock granted");
                return Ok(());
            }

            trace!(client = %self.client_id, lock_id, "Waiting for retry");
            loop {
                let notified = retry.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let mut entries = self.entries.lock();
                    let entry = entries.entry(lock_id).or_default();
                    // The retry may have come in before the busy reply.
                    if entry.retry_received {
                        entry.retry_received = false;
                        break;
                    }
                }
                notified.await;
            }
        }
    }

    /// Runs with the entry in `Releasing`.
    async fn return_to_server(&self, lock_id: LockId) -> YdbResult {
        if let Some(observer) = &self.observer {
            observer.on_release(lock_id).await;
        }
        let result = self.service.release(&self.client_id, lock_id).await;
        if let Err(error) = &result {
            warn!(client = %self.client_id, lock_id, %error, "Release request failed");
        }
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(lock_id).or_default();
            entry.revoke_received = false;
        }
        self.set_state(lock_id, CacheState::None);
        debug!(client = %self.client_id, lock_id, "Returned lock to the service");
        result
    }
}

#[async_trait]
impl LockClient for CachingLockClient {
    #[instrument(level = "trace", skip_all, fields(lock_id = lock_id))]
    async fn acquire(&self, lock_id: LockId) -> YdbResult {
        let (free, retry) = self.notifiers(lock_id);
        loop {
            let notified = free.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut entries = self.entries.lock();
                let entry = entries.entry(lock_id).or_default();
                match entry.state {
                    CacheState::None => {
                        entry.state = CacheState::Acquiring;
                        entry.retry_received = false;
                        entry.revoke_received = false;
                        Next::Request
                    }
                    CacheState::Free => {
                        entry.state = CacheState::Locked;
                        Next::Done
                    }
                    CacheState::Acquiring | CacheState::Locked | CacheState::Releasing => {
                        Next::Wait
                    }
                }
            };

            match next {
                Next::Done => {
                    trace!(client = %self.client_id, lock_id, "Cache hit");
                    return Ok(());
                }
                Next::Request => return self.request(lock_id, &retry).await,
                Next::Wait => notified.await,
            }
        }
    }

    #[instrument(level = "trace", skip_all, fields(lock_id = lock_id))]
    async fn release(&self, lock_id: LockId) -> YdbResult {
        {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&lock_id) else {
                return Ok(());
            };
            if entry.state != CacheState::Locked {
                return Ok(());
            }
            if !entry.revoke_received {
                entry.state = CacheState::Free;
                entry.free.notify_one();
                return Ok(());
            }
            entry.state = CacheState::Releasing;
        }
        self.return_to_server(lock_id).await
    }
}

#[async_trait]
impl LockCallbackHandler for CachingLockClient {
    async fn handle_revoke(&self, lock_id: LockId) -> YdbResult {
        let release_now = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(lock_id).or_default();
            trace!(client = %self.client_id, lock_id, state = ?entry.state, "Revoke received");
            match entry.state {
                CacheState::Free => {
                    entry.state = CacheState::Releasing;
                    true
                }
                CacheState::Acquiring | CacheState::Locked => {
                    entry.revoke_received = true;
                    false
                }
                CacheState::None | CacheState::Releasing => false,
            }
        };
        if release_now {
            self.return_to_server(lock_id).await
        } else {
            Ok(())
        }
    }

    async fn handle_retry(&self, lock_id: LockId) -> YdbResult {
        let mut entries = self.entries.lock();
        let entry = entries.entry(lock_id).or_default();
        trace!(client = %self.client_id, lock_id, "Retry received");
        entry.retry_received = true;
        entry.retry.notify_one();
        Ok(())
    }
}
