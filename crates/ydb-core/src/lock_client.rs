// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::LockStatus;

use crate::lock_service::LockServiceApi;

mod caching;

pub use caching::{CacheState, CachingLockClient};

/// Process-local handle on the lock service.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Wait until this process holds `lock_id`.
    async fn acquire(&self, lock_id: LockId) -> YdbResult;

    /// Give up `lock_id`. Releasing a lock that is not held succeeds.
    async fn release(&self, lock_id: LockId) -> YdbResult;
}

/// Called before a cached lock goes back to the lock service, so state
/// protected by the lock can be flushed first.
#[async_trait]
pub trait LockReleaseObserver: Send + Sync {
    async fn on_release(&self, lock_id: LockId);
}

/// Forwards every call to a blocking lock service.
pub struct RemoteLockClient {
    client_id: ClientId,
    service: Arc<dyn LockServiceApi>,
}

impl RemoteLockClient {
    pub fn new(client_id: ClientId, service: Arc<dyn LockServiceApi>) -> Self {
        Self { client_id, service }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

#[async_trait]
impl LockClient for RemoteLockClient {
    async fn acquire(&self, lock_id: LockId) -> YdbResult {
        match self.service.acquire(&self.client_id, lock_id).await? {
            LockStatus::Granted => Ok(()),
            status => Err(YdbError::UnexpectedLockStatus { lock_id, status }),
        }
    }

    async fn release(&self, lock_id: LockId) -> YdbResult {
        self.service.release(&self.client_id, lock_id).await
    }
}
