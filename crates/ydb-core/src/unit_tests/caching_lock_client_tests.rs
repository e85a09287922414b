// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::callback::LocalCallbackRouter;
use crate::lock_service::CachingLockService;
use crate::test_lock_service_clients::{LocalLockServiceClient, LocalLockServiceFaultConfig};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use ydb_types::error::YdbError;

struct Harness {
    router: Arc<LocalCallbackRouter>,
    service: Arc<CachingLockService>,
}

impl Harness {
    fn new() -> Self {
        let router = Arc::new(LocalCallbackRouter::new());
        let service = Arc::new(CachingLockService::new(router.clone()));
        Self { router, service }
    }

    /// A caching client with its own request counters.
    fn client(&self, name: &str) -> (Arc<CachingLockClient>, Arc<LocalLockServiceClient>) {
        self.client_with(name, None)
    }

    fn client_with(
        &self,
        name: &str,
        observer: Option<Arc<dyn LockReleaseObserver>>,
    ) -> (Arc<CachingLockClient>, Arc<LocalLockServiceClient>) {
        let rpc = Arc::new(LocalLockServiceClient::new(self.service.clone()));
        let mut client = CachingLockClient::new(ClientId::from(name), rpc.clone());
        if let Some(observer) = observer {
            client = client.with_observer(observer);
        }
        let client = Arc::new(client);
        let handler: Arc<dyn LockCallbackHandler> = client.clone();
        self.router.register(ClientId::from(name), &handler);
        (client, rpc)
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_cached_lock_needs_no_request() {
    let harness = Harness::new();
    let (a, rpc) = harness.client("a");

    a.acquire(1).await.unwrap();
    assert_eq!(a.state(1), CacheState::Locked);
    a.release(1).await.unwrap();
    assert_eq!(a.state(1), CacheState::Free);

    for _ in 0..5 {
        a.acquire(1).await.unwrap();
        a.release(1).await.unwrap();
    }
    assert_eq!(rpc.acquire_calls(), 1);
    assert_eq!(rpc.release_calls(), 0);
    // The service still sees a as the holder.
    assert_eq!(harness.service.stat(1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_release_when_not_held_is_a_no_op() {
    let harness = Harness::new();
    let (a, rpc) = harness.client("a");
    a.release(9).await.unwrap();
    assert_eq!(a.state(9), CacheState::None);
    assert_eq!(rpc.release_calls(), 0);
}

#[tokio::test]
async fn test_revoke_on_free_lock_returns_it() {
    let harness = Harness::new();
    let (a, a_rpc) = harness.client("a");
    let (b, b_rpc) = harness.client("b");

    a.acquire(1).await.unwrap();
    a.release(1).await.unwrap();

    b.acquire(1).await.unwrap();
    assert_eq!(b.state(1), CacheState::Locked);
    assert_eq!(a.state(1), CacheState::None);
    assert_eq!(a_rpc.release_calls(), 1);
    // Busy reply, then the retry.
    assert_eq!(b_rpc.acquire_calls(), 2);
    assert_eq!(harness.service.snapshot(1).holder, Some(ClientId::from("b")));
    assert!(harness.service.check());
}

#[tokio::test]
async fn test_revoke_waits_for_local_release() {
    let harness = Harness::new();
    let (a, a_rpc) = harness.client("a");
    let (b, _) = harness.client("b");

    a.acquire(1).await.unwrap();
    let waiter = {
        let b = b.clone();
        tokio::spawn(async move { b.acquire(1).await })
    };
    settle().await;

    // The revoke did not interrupt a.
    assert!(!waiter.is_finished());
    assert_eq!(a.state(1), CacheState::Locked);
    assert_eq!(b.state(1), CacheState::Acquiring);
    assert_eq!(a_rpc.release_calls(), 0);

    a.release(1).await.unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(a.state(1), CacheState::None);
    assert_eq!(b.state(1), CacheState::Locked);
    assert_eq!(a_rpc.release_calls(), 1);
}

#[tokio::test]
async fn test_local_tasks_share_a_cached_lock() {
    let harness = Harness::new();
    let (a, rpc) = harness.client("a");

    a.acquire(2).await.unwrap();
    let waiter = {
        let a = a.clone();
        tokio::spawn(async move { a.acquire(2).await })
    };
    settle().await;
    assert!(!waiter.is_finished());

    a.release(2).await.unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(a.state(2), CacheState::Locked);
    assert_eq!(rpc.acquire_calls(), 1);
}

#[tokio::test]
async fn test_grant_with_queue_is_returned_at_first_release() {
    let harness = Harness::new();
    let (a, _) = harness.client("a");
    let (b, b_rpc) = harness.client("b");
    let (c, _) = harness.client("c");

    a.acquire(3).await.unwrap();
    let b_waiter = {
        let b = b.clone();
        tokio::spawn(async move { b.acquire(3).await })
    };
    settle().await;
    let c_waiter = {
        let c = c.clone();
        tokio::spawn(async move { c.acquire(3).await })
    };
    settle().await;

    a.release(3).await.unwrap();
    b_waiter.await.unwrap().unwrap();
    assert_eq!(b.state(3), CacheState::Locked);
    assert!(!c_waiter.is_finished());

    // c is queued, so b must not keep the lock cached.
    b.release(3).await.unwrap();
    assert_eq!(b.state(3), CacheState::None);
    assert_eq!(b_rpc.release_calls(), 1);
    c_waiter.await.unwrap().unwrap();
    assert_eq!(c.state(3), CacheState::Locked);
    assert!(harness.service.check());
}

#[tokio::test]
async fn test_acquire_failure_is_returned() {
    let harness = Harness::new();
    let (a, rpc) = harness.client("a");
    rpc.set_fault_config(LocalLockServiceFaultConfig {
        fail_acquire: true,
        ..Default::default()
    });

    let err = a.acquire(5).await.unwrap_err();
    assert!(matches!(err, YdbError::ClientIoError { .. }));
    assert_eq!(a.state(5), CacheState::None);

    rpc.set_fault_config(LocalLockServiceFaultConfig::default());
    a.acquire(5).await.unwrap();
    assert_eq!(a.state(5), CacheState::Locked);
}

struct StatObserver {
    service: Arc<CachingLockService>,
    seen: parking_lot::Mutex<Vec<(LockId, i32)>>,
}

#[async_trait]
impl LockReleaseObserver for StatObserver {
    async fn on_release(&self, lock_id: LockId) {
        let held = self.service.stat(lock_id).await.unwrap();
        self.seen.lock().push((lock_id, held));
    }
}

#[tokio::test]
async fn test_observer_runs_before_the_lock_is_returned() {
    let harness = Harness::new();
    let observer = Arc::new(StatObserver {
        service: harness.service.clone(),
        seen: Default::default(),
    });
    let (a, _) = harness.client_with("a", Some(observer.clone()));
    let (b, _) = harness.client("b");

    a.acquire(6).await.unwrap();
    a.release(6).await.unwrap();
    assert!(observer.seen.lock().is_empty());

    b.acquire(6).await.unwrap();
    assert_eq!(*observer.seen.lock(), vec![(6, 1)]);
}

/// Observer that holds a lock return until `open` is signalled.
#[derive(Default)]
struct GatedObserver {
    entered: Notify,
    open: Notify,
}

#[async_trait]
impl LockReleaseObserver for GatedObserver {
    async fn on_release(&self, _lock_id: LockId) {
        self.entered.notify_one();
        self.open.notified().await;
    }
}

#[tokio::test]
async fn test_acquire_waits_for_release_in_flight() {
    let harness = Harness::new();
    let gate = Arc::new(GatedObserver::default());
    let (a, rpc) = harness.client_with("a", Some(gate.clone()));

    a.acquire(8).await.unwrap();
    a.release(8).await.unwrap();
    assert_eq!(a.state(8), CacheState::Free);

    let revoke = {
        let a = a.clone();
        tokio::spawn(async move { a.handle_revoke(8).await })
    };
    gate.entered.notified().await;
    assert_eq!(a.state(8), CacheState::Releasing);

    let waiter = {
        let a = a.clone();
        tokio::spawn(async move { a.acquire(8).await })
    };
    settle().await;
    // No new request while the old one is still being returned.
    assert!(!waiter.is_finished());
    assert_eq!(a.state(8), CacheState::Releasing);
    assert_eq!(rpc.acquire_calls(), 1);
    assert_eq!(rpc.release_calls(), 0);

    gate.open.notify_one();
    revoke.await.unwrap().unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(a.state(8), CacheState::Locked);
    assert_eq!(rpc.release_calls(), 1);
    assert_eq!(rpc.acquire_calls(), 2);
    assert_eq!(harness.service.snapshot(8).holder, Some(ClientId::from("a")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_across_clients() {
    let harness = Harness::new();
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    // Clients stay alive until the end so revokes can always be delivered.
    let mut clients = Vec::new();
    let mut tasks = Vec::new();
    for name in ["a", "b", "c"] {
        let (client, _) = harness.client(name);
        clients.push(client.clone());
        for _ in 0..3 {
            let client = client.clone();
            let inside = inside.clone();
            let entries = entries.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    client.acquire(7).await.unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    entries.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    client.release(7).await.unwrap();
                }
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 90);
    assert!(harness.service.check());
}
