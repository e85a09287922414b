// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ydb_network::network::NetworkClient;
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::{LockRequest, LockStatus};
use ydb_types::serialize::SerializedMessage;

use crate::lock_service::LockServiceApi;

/// Talks to a lock service served by [`crate::server::LockServer`].
#[derive(Clone)]
pub struct NetworkLockServiceClient(NetworkClient);

impl NetworkLockServiceClient {
    pub fn new(network_client: NetworkClient) -> Self {
        Self(network_client)
    }
}

#[async_trait]
impl LockServiceApi for NetworkLockServiceClient {
    async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<LockStatus> {
        let request = LockRequest::new(client_id.clone(), lock_id);
        let response = self
            .0
            .send_recv(&SerializedMessage::LockAcquire(Box::new(request)))
            .await?;
        match response {
            SerializedMessage::LockResp(status) => Ok(status),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }

    async fn release(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        let request = LockRequest::new(client_id.clone(), lock_id);
        let response = self
            .0
            .send_recv(&SerializedMessage::LockRelease(Box::new(request)))
            .await?;
        match response {
            SerializedMessage::Ack => Ok(()),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }

    async fn stat(&self, lock_id: LockId) -> YdbResult<i32> {
        match self.0.send_recv(&SerializedMessage::LockStat(lock_id)).await? {
            SerializedMessage::LockStatResp(count) => Ok(count),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }
}
