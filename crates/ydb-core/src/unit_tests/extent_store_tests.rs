// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_create_put_get_remove() {
    let store = InMemoryExtentStore::new();
    let id = store.create(ExtentKind::File).await.unwrap();
    assert!(id >= KEY_TABLE_SIZE);
    assert_eq!(store.get(id).await.unwrap(), Vec::<u8>::new());

    store.put(id, b"hello".to_vec()).await.unwrap();
    assert_eq!(store.get(id).await.unwrap(), b"hello".to_vec());
    let attr = store.get_attr(id).await.unwrap();
    assert_eq!(attr.kind, ExtentKind::File);
    assert_eq!(attr.size, 5);

    store.remove(id).await.unwrap();
    assert_eq!(
        store.get(id).await,
        Err(YdbError::ExtentNotFound { extent_id: id })
    );
    assert_eq!(
        store.remove(id).await,
        Err(YdbError::ExtentNotFound { extent_id: id })
    );
}

#[tokio::test]
async fn test_create_hands_out_distinct_ids() {
    let store = InMemoryExtentStore::new();
    let dir = store.create(ExtentKind::Dir).await.unwrap();
    let link = store.create(ExtentKind::Symlink).await.unwrap();
    assert_ne!(dir, link);
    assert_eq!(store.get_attr(dir).await.unwrap().kind, ExtentKind::Dir);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_put_creates_missing_extent() {
    let store = InMemoryExtentStore::new();
    assert!(store.is_empty());
    store.put(17, b"v".to_vec()).await.unwrap();
    assert_eq!(store.get(17).await.unwrap(), b"v".to_vec());
    assert_eq!(store.get_attr(17).await.unwrap().kind, ExtentKind::File);
}
