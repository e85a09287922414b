// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::callback::{LocalCallbackRouter, LockCallbackHandler};
use crate::extent_store::InMemoryExtentStore;
use crate::lock_client::{CachingLockClient, RemoteLockClient};
use crate::lock_service::{BlockingLockService, CachingLockService};
use crate::test_lock_service_clients::LocalLockServiceClient;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use ydb_types::base_types::{LockId, BOOKKEEPING_LOCK_ID};

/// Remembers which locks were taken.
struct RecordingLocks {
    inner: RemoteLockClient,
    acquired: Mutex<Vec<LockId>>,
}

#[async_trait]
impl LockClient for RecordingLocks {
    async fn acquire(&self, lock_id: LockId) -> YdbResult {
        self.acquired.lock().push(lock_id);
        self.inner.acquire(lock_id).await
    }

    async fn release(&self, lock_id: LockId) -> YdbResult {
        self.inner.release(lock_id).await
    }
}

fn setup() -> (Arc<RecordingLocks>, KeyValueStore, OptimisticCoordinator) {
    let locks = Arc::new(RecordingLocks {
        inner: RemoteLockClient::new("ydb".into(), Arc::new(BlockingLockService::new())),
        acquired: Mutex::new(Vec::new()),
    });
    let store = KeyValueStore::new(Arc::new(InMemoryExtentStore::new()));
    let coordinator = OptimisticCoordinator::new(locks.clone(), store.clone());
    (locks, store, coordinator)
}

#[tokio::test]
async fn test_read_your_writes() {
    let (_, store, coordinator) = setup();
    store.write("a", b"0".to_vec()).await.unwrap();

    let txn = coordinator.begin().await.unwrap();
    assert_eq!(txn, 1);
    assert_eq!(coordinator.get(txn, "a").await.unwrap(), b"0".to_vec());
    coordinator.set(txn, "a", b"1".to_vec()).await.unwrap();
    assert_eq!(coordinator.get(txn, "a").await.unwrap(), b"1".to_vec());
    coordinator.set(txn, "b", b"2".to_vec()).await.unwrap();
    assert_eq!(coordinator.get(txn, "b").await.unwrap(), b"2".to_vec());

    // Nothing reaches the store before commit.
    assert_eq!(store.read("a").await.unwrap(), b"0".to_vec());
    assert_eq!(store.read("b").await.unwrap(), Vec::<u8>::new());

    coordinator.commit(txn).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), b"1".to_vec());
    assert_eq!(store.read("b").await.unwrap(), b"2".to_vec());
    assert_eq!(
        coordinator.state(txn).await.unwrap(),
        Some(TransactionState::Committed)
    );
}

#[tokio::test]
async fn test_reads_are_snapshotted() {
    let (_, store, coordinator) = setup();
    store.write("a", b"0".to_vec()).await.unwrap();
    let txn = coordinator.begin().await.unwrap();
    assert_eq!(coordinator.get(txn, "a").await.unwrap(), b"0".to_vec());
    store.write("a", b"9".to_vec()).await.unwrap();
    assert_eq!(coordinator.get(txn, "a").await.unwrap(), b"0".to_vec());
}

#[tokio::test]
async fn test_stale_read_fails_validation() {
    let (_, store, coordinator) = setup();
    let t1 = coordinator.begin().await.unwrap();
    let t2 = coordinator.begin().await.unwrap();

    assert_eq!(coordinator.get(t1, "a").await.unwrap(), Vec::<u8>::new());
    coordinator.set(t1, "b", b"from t1".to_vec()).await.unwrap();

    coordinator.set(t2, "a", b"from t2".to_vec()).await.unwrap();
    coordinator.commit(t2).await.unwrap();

    let err = coordinator.commit(t1).await.unwrap_err();
    assert_eq!(
        err,
        YdbError::TransactionAborted {
            transaction_id: t1,
            reason: AbortReason::ValidationFailed,
        }
    );
    assert!(err.is_abort());
    assert!(!err.is_transport());
    assert_eq!(
        coordinator.state(t1).await.unwrap(),
        Some(TransactionState::Aborted)
    );
    // Nothing from t1 was installed.
    assert_eq!(store.read("b").await.unwrap(), Vec::<u8>::new());
    assert_eq!(store.read("a").await.unwrap(), b"from t2".to_vec());

    // Only abort is accepted afterwards.
    assert_eq!(
        coordinator.get(t1, "a").await,
        Err(YdbError::InvalidTransaction { transaction_id: t1 })
    );
    coordinator.abort(t1).await.unwrap();
}

#[tokio::test]
async fn test_unchanged_reads_validate() {
    let (_, store, coordinator) = setup();
    store.write("a", b"0".to_vec()).await.unwrap();
    let t1 = coordinator.begin().await.unwrap();
    let t2 = coordinator.begin().await.unwrap();

    assert_eq!(coordinator.get(t1, "a").await.unwrap(), b"0".to_vec());
    // t2 writes a different key.
    coordinator.set(t2, "b", b"1".to_vec()).await.unwrap();
    coordinator.commit(t2).await.unwrap();

    coordinator.set(t1, "a", b"2".to_vec()).await.unwrap();
    coordinator.commit(t1).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), b"2".to_vec());
}

#[tokio::test]
async fn test_blind_writes_last_commit_wins() {
    let (_, store, coordinator) = setup();
    let t1 = coordinator.begin().await.unwrap();
    let t2 = coordinator.begin().await.unwrap();
    coordinator.set(t1, "a", b"1".to_vec()).await.unwrap();
    coordinator.set(t2, "a", b"2".to_vec()).await.unwrap();
    coordinator.commit(t2).await.unwrap();
    coordinator.commit(t1).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), b"1".to_vec());
}

#[tokio::test]
async fn test_abort_and_invalid_transactions() {
    let (_, store, coordinator) = setup();
    let txn = coordinator.begin().await.unwrap();
    coordinator.set(txn, "a", b"1".to_vec()).await.unwrap();
    coordinator.del(txn, "a").await.unwrap();
    assert_eq!(coordinator.get(txn, "a").await.unwrap(), Vec::<u8>::new());
    coordinator.abort(txn).await.unwrap();
    coordinator.abort(txn).await.unwrap();
    assert_eq!(
        coordinator.commit(txn).await,
        Err(YdbError::InvalidTransaction {
            transaction_id: txn
        })
    );
    assert_eq!(store.read("a").await.unwrap(), Vec::<u8>::new());

    assert_eq!(
        coordinator.set(99, "a", vec![1]).await,
        Err(YdbError::InvalidTransaction { transaction_id: 99 })
    );

    let committed = coordinator.begin().await.unwrap();
    coordinator.commit(committed).await.unwrap();
    assert_eq!(
        coordinator.abort(committed).await,
        Err(YdbError::InvalidTransaction {
            transaction_id: committed
        })
    );
}

#[tokio::test]
async fn test_only_the_bookkeeping_lock_is_used() {
    let (locks, _, coordinator) = setup();
    let txn = coordinator.begin().await.unwrap();
    coordinator.get(txn, "a").await.unwrap();
    coordinator.set(txn, "b", b"1".to_vec()).await.unwrap();
    coordinator.commit(txn).await.unwrap();

    let acquired = locks.acquired.lock().clone();
    assert!(!acquired.is_empty());
    assert!(acquired.iter().all(|&lock_id| lock_id == BOOKKEEPING_LOCK_ID));
}

#[tokio::test]
async fn test_cached_bookkeeping_lock() {
    let router = Arc::new(LocalCallbackRouter::new());
    let service = Arc::new(CachingLockService::new(router.clone()));
    let rpc = Arc::new(LocalLockServiceClient::new(service));
    let client = Arc::new(CachingLockClient::new("ydb".into(), rpc.clone()));
    let handler: Arc<dyn LockCallbackHandler> = client.clone();
    router.register("ydb".into(), &handler);

    let coordinator = OptimisticCoordinator::new(
        client,
        KeyValueStore::new(Arc::new(InMemoryExtentStore::new())),
    );
    for _ in 0..3 {
        let txn = coordinator.begin().await.unwrap();
        coordinator.set(txn, "a", b"1".to_vec()).await.unwrap();
        coordinator.get(txn, "a").await.unwrap();
        coordinator.commit(txn).await.unwrap();
    }
    // Granted once, then served from the cache.
    assert_eq!(rpc.acquire_calls(), 1);
    assert_eq!(rpc.release_calls(), 0);
}
