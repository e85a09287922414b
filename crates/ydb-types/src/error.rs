// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base_types::*;
use crate::messages::LockStatus;

#[macro_export]
macro_rules! fp_bail {
    ($e:expr) => {
        return Err($e)
    };
}

#[macro_export(local_inner_macros)]
macro_rules! fp_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            fp_bail!($e);
        }
    };
}

/// Why a transaction ended in `Aborted`.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Serialize, Deserialize, Hash)]
pub enum AbortReason {
    /// Waiting for the requested lock would have closed a cycle in the wait-for graph.
    Deadlock,
    /// A key in the read set changed between the first read and commit.
    ValidationFailed,
}

#[derive(Eq, PartialEq, Clone, Debug, Serialize, Deserialize, Error, Hash)]
/// Custom error type for YDB.
pub enum YdbError {
    // Transport
    #[error("Client I/O error: {error}")]
    ClientIoError { error: String },
    #[error("Cannot deserialize.")]
    InvalidDecoding,
    #[error("Unexpected message.")]
    UnexpectedMessage,
    #[error("Failed to deliver callback for lock {lock_id} to {client_id}: {error}")]
    CallbackFailed {
        client_id: ClientId,
        lock_id: LockId,
        error: String,
    },

    // Lock protocol
    #[error("Lock {lock_id} is not held by {client_id}")]
    LockNotHeld { lock_id: LockId, client_id: ClientId },
    #[error("Unexpected status {status:?} for lock {lock_id}")]
    UnexpectedLockStatus { lock_id: LockId, status: LockStatus },

    // Transactions
    #[error("Transaction {transaction_id} aborted: {reason:?}")]
    TransactionAborted {
        transaction_id: TransactionId,
        reason: AbortReason,
    },
    #[error("Transaction {transaction_id} is unknown or no longer active")]
    InvalidTransaction { transaction_id: TransactionId },

    // Extent store
    #[error("Extent {extent_id} does not exist")]
    ExtentNotFound { extent_id: ExtentId },
    #[error("Storage error: {error}")]
    StorageError { error: String },
}

pub type YdbResult<T = ()> = Result<T, YdbError>;

impl YdbError {
    /// The request ran into an expected concurrency-control abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, YdbError::TransactionAborted { .. })
    }

    /// The request could not be delivered, or its reply could not be read.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            YdbError::ClientIoError { .. }
                | YdbError::InvalidDecoding
                | YdbError::UnexpectedMessage
                | YdbError::CallbackFailed { .. }
        )
    }
}

impl From<std::io::Error> for YdbError {
    fn from(error: std::io::Error) -> Self {
        YdbError::ClientIoError {
            error: error.to_string(),
        }
    }
}
