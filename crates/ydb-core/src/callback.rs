// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;
use ydb_network::network::NetworkClient;
use ydb_types::base_types::{ClientId, LockId};
use ydb_types::error::{YdbError, YdbResult};
use ydb_types::messages::{CallbackKind, CallbackRequest};
use ydb_types::serialize::SerializedMessage;

#[cfg(test)]
#[path = "unit_tests/callback_tests.rs"]
mod callback_tests;

/// Delivers server-initiated signals to lock clients.
#[async_trait]
pub trait CallbackRouter: Send + Sync {
    async fn revoke(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult;

    async fn retry(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult;

    async fn deliver(&self, client_id: &ClientId, kind: CallbackKind, lock_id: LockId) -> YdbResult {
        match kind {
            CallbackKind::Revoke => self.revoke(client_id, lock_id).await,
            CallbackKind::Retry => self.retry(client_id, lock_id).await,
        }
    }
}

/// Client-side receiver of `revoke` and `retry` signals.
#[async_trait]
pub trait LockCallbackHandler: Send + Sync {
    async fn handle_revoke(&self, lock_id: LockId) -> YdbResult;

    async fn handle_retry(&self, lock_id: LockId) -> YdbResult;

    async fn handle_callback(&self, request: CallbackRequest) -> YdbResult {
        match request.kind {
            CallbackKind::Revoke => self.handle_revoke(request.lock_id).await,
            CallbackKind::Retry => self.handle_retry(request.lock_id).await,
        }
    }
}

/// Routes callbacks to handlers living in the same process.
///
/// Handlers are held weakly; a dropped client simply becomes unreachable.
#[derive(Default)]
pub struct LocalCallbackRouter {
    handlers: RwLock<HashMap<ClientId, Weak<dyn LockCallbackHandler>>>,
}

impl LocalCallbackRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: ClientId, handler: &Arc<dyn LockCallbackHandler>) {
        self.handlers
            .write()
            .insert(client_id, Arc::downgrade(handler));
    }

    pub fn unregister(&self, client_id: &ClientId) {
        self.handlers.write().remove(client_id);
    }

    fn handler(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult<Arc<dyn LockCallbackHandler>> {
        self.handlers
            .read()
            .get(client_id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| YdbError::CallbackFailed {
                client_id: client_id.clone(),
                lock_id,
                error: "no handler registered".to_string(),
            })
    }
}

#[async_trait]
impl CallbackRouter for LocalCallbackRouter {
    async fn revoke(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        let handler = self.handler(client_id, lock_id)?;
        handler.handle_revoke(lock_id).await
    }

    async fn retry(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        let handler = self.handler(client_id, lock_id)?;
        handler.handle_retry(lock_id).await
    }
}

/// Sends callbacks over the network. A client id is the `host:port` of the
/// client's callback endpoint.
#[derive(Clone, Debug)]
pub struct NetworkCallbackRouter {
    buffer_size: usize,
    send_timeout: Duration,
    recv_timeout: Duration,
}

impl NetworkCallbackRouter {
    pub fn new(buffer_size: usize, send_timeout: Duration, recv_timeout: Duration) -> Self {
        Self {
            buffer_size,
            send_timeout,
            recv_timeout,
        }
    }

    async fn send(&self, client_id: &ClientId, kind: CallbackKind, lock_id: LockId) -> YdbResult {
        let client = NetworkClient::new(
            client_id.to_string(),
            self.buffer_size,
            self.send_timeout,
            self.recv_timeout,
        );
        trace!(client = %client_id, lock_id, ?kind, "Sending callback");
        let message = SerializedMessage::Callback(Box::new(CallbackRequest { kind, lock_id }));
        let to_callback_error = |error: YdbError| YdbError::CallbackFailed {
            client_id: client_id.clone(),
            lock_id,
            error: error.to_string(),
        };
        match client.send_recv(&message).await.map_err(to_callback_error)? {
            SerializedMessage::CallbackResp => Ok(()),
            _ => Err(to_callback_error(YdbError::UnexpectedMessage)),
        }
    }
}

#[async_trait]
impl CallbackRouter for NetworkCallbackRouter {
    async fn revoke(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        self.send(client_id, CallbackKind::Revoke, lock_id).await
    }

    async fn retry(&self, client_id: &ClientId, lock_id: LockId) -> YdbResult {
        self.send(client_id, CallbackKind::Retry, lock_id).await
    }
}
