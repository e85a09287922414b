// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

#[cfg(test)]
#[path = "unit_tests/base_types_tests.rs"]
mod base_types_tests;

pub type LockId = u64;
pub type ExtentId = u64;
pub type TransactionId = u64;

/// Lock taken by the transaction coordinators around their own tables.
/// `hash_key` never maps a user key onto it.
pub const BOOKKEEPING_LOCK_ID: LockId = 0;

/// Extent slot reserved for store metadata.
pub const METADATA_EXTENT_ID: ExtentId = 1;

/// Identifiers below this value are never produced by `hash_key`.
pub const RESERVED_IDS: u64 = 2;

/// Number of slots in the key table, reserved slots included.
pub const KEY_TABLE_SIZE: u64 = 1024;

/// Identity of a lock client process.
///
/// A caching client uses the `host:port` address of its callback endpoint, so
/// the lock service can reach it with `revoke` and `retry` signals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Map a user key onto its slot in the key table.
///
/// The slot is both the lock guarding the key and the extent holding it. The
/// hash is seeded with a constant so every process agrees on the mapping.
pub fn hash_key(key: &str) -> LockId {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key.as_bytes());
    RESERVED_IDS + hasher.finish() % (KEY_TABLE_SIZE - RESERVED_IDS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtentKind {
    Dir,
    File,
    Symlink,
}

/// Metadata kept next to every extent. Times are seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentAttr {
    pub kind: ExtentKind,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Started,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Started)
    }
}
