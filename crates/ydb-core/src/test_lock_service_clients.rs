// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::LockStatus;

use crate::lock_service::LockServiceApi;

#[derive(Clone, Copy, Default, Debug)]
pub struct LocalLockServiceFaultConfig {
    pub fail_acquire: bool,
    pub fail_release: bool,
}

impl LocalLockServiceFaultConfig {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// In-process stand-in for a remote lock service, counting requests and
/// able to fail them like a broken connection would.
pub struct LocalLockServiceClient {
    pub service: Arc<dyn LockServiceApi>,
    pub fault_config: Mutex<LocalLockServiceFaultConfig>,
    acquire_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl LocalLockServiceClient {
    pub fn new(service: Arc<dyn LockServiceApi>) -> Self {
        Self {
            service,
            fault_config: Mutex::new(LocalLockServiceFaultConfig::default()),
            acquire_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_fault_config(&self, fault_config: LocalLockServiceFaultConfig) {
        *self.fault_config.lock() = fault_config;
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockServiceApi for LocalLockServiceClient {
    async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<LockStatus> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fault_config.lock().fail_acquire {
            return Err(YdbError::ClientIoError {
                error: "Mock error before acquire".to_owned(),
            });
        }
        self.service.acquire(client_id, lock_id).await
    }

    async fn release(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.fault_config.lock().fail_release {
            return Err(YdbError::ClientIoError {
                error: "Mock error before release".to_owned(),
            });
        }
        self.service.release(client_id, lock_id).await
    }

    async fn stat(&self, lock_id: LockId) -> YdbResult<i32> {
        self.service.stat(lock_id).await
    }
}
