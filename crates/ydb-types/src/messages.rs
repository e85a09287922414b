// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::base_types::*;

/// Reply of the lock service to `acquire`.
///
/// `Retry` is not an error: the lock is busy, the caller has been queued and
/// will receive a `retry` callback when it should ask again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockStatus {
    Granted,
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub client_id: ClientId,
    pub lock_id: LockId,
}

impl LockRequest {
    pub fn new(client_id: ClientId, lock_id: LockId) -> Self {
        Self { client_id, lock_id }
    }
}

/// Server-to-client signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallbackKind {
    /// Another client wants the lock; hand it back once it is no longer in use.
    Revoke,
    /// The lock was released; re-issue `acquire`.
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub kind: CallbackKind,
    pub lock_id: LockId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRequest {
    Begin,
    Commit {
        transaction_id: TransactionId,
    },
    Abort {
        transaction_id: TransactionId,
    },
    Get {
        transaction_id: TransactionId,
        key: String,
    },
    Set {
        transaction_id: TransactionId,
        key: String,
        value: Vec<u8>,
    },
    Del {
        transaction_id: TransactionId,
        key: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionResponse {
    Begun { transaction_id: TransactionId },
    Done,
    Value { value: Vec<u8> },
}
