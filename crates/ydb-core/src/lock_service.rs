// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::YdbResult;
use ydb_types::messages::LockStatus;

mod blocking;
mod caching;

pub use blocking::BlockingLockService;
pub use caching::{CachingLockService, LockSnapshot};

/// The authority over every lock's state, seen from a lock client.
///
/// Locks are created on first use. Implemented by the services themselves,
/// by [`crate::lock_service_client::NetworkLockServiceClient`] for remote
/// access and by [`crate::test_lock_service_clients::LocalLockServiceClient`]
/// for in-process wiring.
#[async_trait]
pub trait LockServiceApi: Send + Sync {
    /// Ask for `lock_id` on behalf of `client_id`.
    ///
    /// A blocking service only ever answers `Granted`. A caching service
    /// answers `Retry` when the lock is busy; the caller is then queued and
    /// will receive a `retry` callback.
    async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<LockStatus>;

    /// Hand `lock_id` back. Releasing a lock nobody holds succeeds.
    async fn release(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult;

    /// Number of clients currently holding `lock_id` (0 or 1).
    async fn stat(&self, lock_id: LockId) -> YdbResult<i32>;
}
