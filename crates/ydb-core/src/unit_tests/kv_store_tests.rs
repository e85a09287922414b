// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::extent_store::InMemoryExtentStore;
use pretty_assertions::assert_eq;
use ydb_types::base_types::{KEY_TABLE_SIZE, RESERVED_IDS};

fn new_store() -> (Arc<InMemoryExtentStore>, KeyValueStore) {
    let extents = Arc::new(InMemoryExtentStore::new());
    let store = KeyValueStore::new(extents.clone());
    (extents, store)
}

/// Two distinct keys hashing onto the same slot.
fn colliding_keys() -> (String, String) {
    let mut seen = BTreeMap::new();
    for i in 0.. {
        let key = format!("key-{i}");
        if let Some(other) = seen.insert(hash_key(&key), key.clone()) {
            return (other, key);
        }
    }
    unreachable!()
}

#[tokio::test]
async fn test_missing_key_reads_empty() {
    let (extents, store) = new_store();
    assert_eq!(store.read("nothing").await.unwrap(), Vec::<u8>::new());
    assert!(extents.is_empty());
}

#[tokio::test]
async fn test_write_then_read() {
    let (extents, store) = new_store();
    store.write("a", b"1".to_vec()).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), b"1".to_vec());

    let slot = KeyValueStore::slot("a");
    assert!((RESERVED_IDS..KEY_TABLE_SIZE).contains(&slot));
    assert!(extents.get(slot).await.is_ok());

    store.write("a", b"2".to_vec()).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), b"2".to_vec());
}

#[tokio::test]
async fn test_empty_value_deletes_key_and_extent() {
    let (extents, store) = new_store();
    store.write("a", b"1".to_vec()).await.unwrap();
    store.write("a", vec![]).await.unwrap();
    assert_eq!(store.read("a").await.unwrap(), Vec::<u8>::new());
    assert!(extents.is_empty());

    // Deleting an absent key is fine.
    store.write("a", vec![]).await.unwrap();
}

#[tokio::test]
async fn test_colliding_keys_keep_separate_values() {
    let (extents, store) = new_store();
    let (first, second) = colliding_keys();
    assert_eq!(KeyValueStore::slot(&first), KeyValueStore::slot(&second));

    store.write(&first, b"x".to_vec()).await.unwrap();
    store.write(&second, b"y".to_vec()).await.unwrap();
    assert_eq!(store.read(&first).await.unwrap(), b"x".to_vec());
    assert_eq!(store.read(&second).await.unwrap(), b"y".to_vec());
    assert_eq!(extents.len(), 1);

    store.write(&first, vec![]).await.unwrap();
    assert_eq!(store.read(&first).await.unwrap(), Vec::<u8>::new());
    assert_eq!(store.read(&second).await.unwrap(), b"y".to_vec());
    assert_eq!(extents.len(), 1);
}

#[tokio::test]
async fn test_corrupt_bucket_is_a_storage_error() {
    let (extents, store) = new_store();
    let slot = KeyValueStore::slot("a");
    extents.put(slot, vec![0xff; 3]).await.unwrap();
    let err = store.read("a").await.unwrap_err();
    assert!(matches!(err, YdbError::StorageError { .. }));
    assert!(!err.is_transport());
    assert!(!err.is_abort());
}
