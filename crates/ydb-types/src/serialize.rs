// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::format_err;
use serde::{Deserialize, Serialize};

use crate::base_types::LockId;
use crate::error::*;
use crate::messages::*;

#[cfg(test)]
#[path = "unit_tests/serialize_tests.rs"]
mod serialize_tests;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum SerializedMessage {
    // Client -> lock service
    LockAcquire(Box<LockRequest>),
    LockRelease(Box<LockRequest>),
    LockStat(LockId),
    // Lock service -> client
    LockResp(LockStatus),
    LockStatResp(i32),
    Callback(Box<CallbackRequest>),
    CallbackResp,
    // Transactions
    TransactionReq(Box<TransactionRequest>),
    TransactionResp(Box<TransactionResponse>),
    // Any direction
    Ack,
    Error(Box<YdbError>),
}

pub fn serialize_message(message: &SerializedMessage) -> Vec<u8> {
    bincode::serialize(message).expect("Serializing to a resizable buffer should not fail.")
}

pub fn serialize_error(error: &YdbError) -> Vec<u8> {
    serialize_message(&SerializedMessage::Error(Box::new(error.clone())))
}

pub fn deserialize_message(buffer: &[u8]) -> Result<SerializedMessage, anyhow::Error> {
    bincode::deserialize(buffer).map_err(|err| format_err!("{err}"))
}

/// Decode a reply, turning a serialized `Error` into `Err`.
pub fn deserialize_reply(buffer: &[u8]) -> YdbResult<SerializedMessage> {
    match deserialize_message(buffer) {
        Ok(SerializedMessage::Error(error)) => Err(*error),
        Ok(message) => Ok(message),
        Err(_) => Err(YdbError::InvalidDecoding),
    }
}
