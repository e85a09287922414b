// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{info, warn};
use ydb_network::network::NetworkServer;
use ydb_network::transport::{spawn_server, MessageHandler, SpawnedServer};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::{TransactionRequest, TransactionResponse};
use ydb_types::serialize::{
    deserialize_message, serialize_error, serialize_message, SerializedMessage,
};

use crate::callback::LockCallbackHandler;
use crate::lock_service::LockServiceApi;
use crate::transaction::TransactionCoordinator;

#[cfg(test)]
#[path = "unit_tests/server_tests.rs"]
mod server_tests;

/// Count the request and turn its outcome into a reply frame.
fn reply(server: &NetworkServer, result: YdbResult<SerializedMessage>) -> Option<Vec<u8>> {
    server.increment_packets_processed();
    match result {
        Ok(message) => Some(serialize_message(&message)),
        Err(error) => {
            warn!("User query failed: {}", error);
            server.increment_user_errors();
            Some(serialize_error(&error))
        }
    }
}

async fn spawn<H>(server: &NetworkServer, handler: H, name: &str) -> Result<SpawnedServer, io::Error>
where
    H: MessageHandler + Send + Sync + 'static,
{
    info!(
        "Listening to {} traffic on {}:{}",
        name, server.base_address, server.base_port
    );
    spawn_server(&server.address(), handler, server.buffer_size).await
}

/// Serves `acquire`, `release` and `stat` for a lock service.
pub struct LockServer {
    server: Arc<NetworkServer>,
    service: Arc<dyn LockServiceApi>,
}

impl LockServer {
    pub fn new(server: NetworkServer, service: Arc<dyn LockServiceApi>) -> Self {
        Self {
            server: Arc::new(server),
            service,
        }
    }

    pub fn network_server(&self) -> Arc<NetworkServer> {
        self.server.clone()
    }

    pub async fn spawn(self) -> Result<SpawnedServer, io::Error> {
        let server = self.server.clone();
        spawn(&server, self, "lock").await
    }

    async fn handle(&self, message: SerializedMessage) -> YdbResult<SerializedMessage> {
        match message {
            SerializedMessage::LockAcquire(request) => self
                .service
                .acquire(&request.client_id, request.lock_id)
                .await
                .map(SerializedMessage::LockResp),
            SerializedMessage::LockRelease(request) => self
                .service
                .release(&request.client_id, request.lock_id)
                .await
                .map(|()| SerializedMessage::Ack),
            SerializedMessage::LockStat(lock_id) => self
                .service
                .stat(lock_id)
                .await
                .map(SerializedMessage::LockStatResp),
            _ => Err(YdbError::UnexpectedMessage),
        }
    }
}

impl MessageHandler for LockServer {
    fn handle_message<'a>(&'a self, buffer: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        async move {
            let result = match deserialize_message(buffer) {
                Err(_) => Err(YdbError::InvalidDecoding),
                Ok(message) => self.handle(message).await,
            };
            reply(&self.server, result)
        }
        .boxed()
    }
}

/// Receives `revoke` and `retry` signals for a caching lock client.
pub struct CallbackServer {
    server: Arc<NetworkServer>,
    handler: Arc<dyn LockCallbackHandler>,
}

impl CallbackServer {
    pub fn new(server: NetworkServer, handler: Arc<dyn LockCallbackHandler>) -> Self {
        Self {
            server: Arc::new(server),
            handler,
        }
    }

    pub fn network_server(&self) -> Arc<NetworkServer> {
        self.server.clone()
    }

    pub async fn spawn(self) -> Result<SpawnedServer, io::Error> {
        let server = self.server.clone();
        spawn(&server, self, "callback").await
    }
}

impl MessageHandler for CallbackServer {
    fn handle_message<'a>(&'a self, buffer: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        async move {
            let result = match deserialize_message(buffer) {
                Err(_) => Err(YdbError::InvalidDecoding),
                Ok(SerializedMessage::Callback(request)) => self
                    .handler
                    .handle_callback(*request)
                    .await
                    .map(|()| SerializedMessage::CallbackResp),
                Ok(_) => Err(YdbError::UnexpectedMessage),
            };
            reply(&self.server, result)
        }
        .boxed()
    }
}

/// Serves the transaction interface of one coordinator.
pub struct YdbServer {
    server: Arc<NetworkServer>,
    coordinator: Arc<dyn TransactionCoordinator>,
}

impl YdbServer {
    pub fn new(server: NetworkServer, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self {
            server: Arc::new(server),
            coordinator,
        }
    }

    pub fn network_server(&self) -> Arc<NetworkServer> {
        self.server.clone()
    }

    pub async fn spawn(self) -> Result<SpawnedServer, io::Error> {
        let server = self.server.clone();
        spawn(&server, self, "ydb").await
    }

    async fn handle(&self, request: TransactionRequest) -> YdbResult<TransactionResponse> {
        let coordinator = &self.coordinator;
        match request {
            TransactionRequest::Begin => coordinator
                .begin()
                .await
                .map(|transaction_id| TransactionResponse::Begun { transaction_id }),
            TransactionRequest::Commit { transaction_id } => coordinator
                .commit(transaction_id)
                .await
                .map(|()| TransactionResponse::Done),
            TransactionRequest::Abort { transaction_id } => coordinator
                .abort(transaction_id)
                .await
                .map(|()| TransactionResponse::Done),
            TransactionRequest::Get {
                transaction_id,
                key,
            } => coordinator
                .get(transaction_id, &key)
                .await
                .map(|value| TransactionResponse::Value { value }),
            TransactionRequest::Set {
                transaction_id,
                key,
                value,
            } => coordinator
                .set(transaction_id, &key, value)
                .await
                .map(|()| TransactionResponse::Done),
            TransactionRequest::Del {
                transaction_id,
                key,
            } => coordinator
                .del(transaction_id, &key)
                .await
                .map(|()| TransactionResponse::Done),
        }
    }
}

impl MessageHandler for YdbServer {
    fn handle_message<'a>(&'a self, buffer: &'a [u8]) -> BoxFuture<'a, Option<Vec<u8>>> {
        async move {
            let result = match deserialize_message(buffer) {
                Err(_) => Err(YdbError::InvalidDecoding),
                Ok(SerializedMessage::TransactionReq(request)) => self
                    .handle(*request)
                    .await
                    .map(|response| SerializedMessage::TransactionResp(Box::new(response))),
                Ok(_) => Err(YdbError::UnexpectedMessage),
            };
            reply(&self.server, result)
        }
        .boxed()
    }
}
