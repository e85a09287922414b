// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_acquire_release_stat() {
    let service = BlockingLockService::new();
    let a = ClientId::from("a");
    assert_eq!(service.stat(7).await.unwrap(), 0);
    assert_eq!(service.acquire(&a, 7).await.unwrap(), LockStatus::Granted);
    assert_eq!(service.stat(7).await.unwrap(), 1);
    service.release(&a, 7).await.unwrap();
    assert_eq!(service.stat(7).await.unwrap(), 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let service = BlockingLockService::new();
    let a = ClientId::from("a");
    // Never seen.
    service.release(&a, 3).await.unwrap();
    service.acquire(&a, 3).await.unwrap();
    service.release(&a, 3).await.unwrap();
    service.release(&a, 3).await.unwrap();
    assert_eq!(service.stat(3).await.unwrap(), 0);
}

#[tokio::test]
async fn test_release_by_non_holder_fails() {
    let service = BlockingLockService::new();
    let a = ClientId::from("a");
    let b = ClientId::from("b");
    service.acquire(&a, 3).await.unwrap();
    assert_eq!(
        service.release(&b, 3).await,
        Err(YdbError::LockNotHeld {
            lock_id: 3,
            client_id: b,
        })
    );
    assert_eq!(service.stat(3).await.unwrap(), 1);
}

#[tokio::test]
async fn test_acquire_blocks_until_release() {
    let service = Arc::new(BlockingLockService::new());
    let a = ClientId::from("a");
    service.acquire(&a, 5).await.unwrap();

    let waiter = {
        let service = service.clone();
        tokio::spawn(async move { service.acquire(&ClientId::from("b"), 5).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    // Other locks are unaffected.
    assert_eq!(service.acquire(&a, 6).await.unwrap(), LockStatus::Granted);

    service.release(&a, 5).await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), LockStatus::Granted);
    assert_eq!(service.stat(5).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion() {
    let service = Arc::new(BlockingLockService::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            let inside = inside.clone();
            let entries = entries.clone();
            tokio::spawn(async move {
                let client = ClientId::new(format!("client-{i}"));
                for _ in 0..20 {
                    service.acquire(&client, 1).await.unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    entries.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    service.release(&client, 1).await.unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 160);
    assert_eq!(service.stat(1).await.unwrap(), 0);
}
