// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ydb_network::network::NetworkClient;
use ydb_types::base_types::TransactionId;
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::{TransactionRequest, TransactionResponse};
use ydb_types::serialize::SerializedMessage;

use crate::transaction::TransactionCoordinator;

/// Remote handle on a coordinator served by [`crate::server::YdbServer`].
#[derive(Clone)]
pub struct NetworkYdbClient(NetworkClient);

impl NetworkYdbClient {
    pub fn new(network_client: NetworkClient) -> Self {
        Self(network_client)
    }

    async fn call(&self, request: TransactionRequest) -> YdbResult<TransactionResponse> {
        let message = SerializedMessage::TransactionReq(Box::new(request));
        match self.0.send_recv(&message).await? {
            SerializedMessage::TransactionResp(response) => Ok(*response),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }

    async fn call_done(&self, request: TransactionRequest) -> YdbResult {
        match self.call(request).await? {
            TransactionResponse::Done => Ok(()),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }
}

#[async_trait]
impl TransactionCoordinator for NetworkYdbClient {
    async fn begin(&self) -> YdbResult<TransactionId> {
        match self.call(TransactionRequest::Begin).await? {
            TransactionResponse::Begun { transaction_id } => Ok(transaction_id),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }

    async fn commit(&self, transaction_id: TransactionId) -> YdbResult {
        self.call_done(TransactionRequest::Commit { transaction_id })
            .await
    }

    async fn abort(&self, transaction_id: TransactionId) -> YdbResult {
        self.call_done(TransactionRequest::Abort { transaction_id })
            .await
    }

    async fn get(&self, transaction_id: TransactionId, key: &str) -> YdbResult<Vec<u8>> {
        let request = TransactionRequest::Get {
            transaction_id,
            key: key.to_owned(),
        };
        match self.call(request).await? {
            TransactionResponse::Value { value } => Ok(value),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }

    async fn set(&self, transaction_id: TransactionId, key: &str, value: Vec<u8>) -> YdbResult {
        self.call_done(TransactionRequest::Set {
            transaction_id,
            key: key.to_owned(),
            value,
        })
        .await
    }

    async fn del(&self, transaction_id: TransactionId, key: &str) -> YdbResult {
        self.call_done(TransactionRequest::Del {
            transaction_id,
            key: key.to_owned(),
        })
        .await
    }
}
