// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use tracing::info;
use ydb_core::callback::{LockCallbackHandler, NetworkCallbackRouter};
use ydb_core::extent_store::InMemoryExtentStore;
use ydb_core::kv_store::KeyValueStore;
use ydb_core::lock_client::{CachingLockClient, LockClient, RemoteLockClient};
use ydb_core::lock_service::{BlockingLockService, CachingLockService, LockServiceApi};
use ydb_core::lock_service_client::NetworkLockServiceClient;
use ydb_core::optimistic::OptimisticCoordinator;
use ydb_core::server::{CallbackServer, LockServer, YdbServer};
use ydb_core::transaction::TransactionCoordinator;
use ydb_core::two_phase::TwoPhaseCoordinator;
use ydb_network::network::{NetworkClient, NetworkServer};
use ydb_network::transport::SpawnedServer;
use ydb_types::base_types::ClientId;

use crate::config::{ConcurrencyControl, LockServerConfig, YdbServerConfig, CALLBACK_TIMEOUT};

pub mod config;

/// Start a lock service listening on `config.host:config.port`.
pub async fn start_lock_server(config: &LockServerConfig) -> Result<SpawnedServer, anyhow::Error> {
    let service: Arc<dyn LockServiceApi> = if config.caching {
        let callbacks = NetworkCallbackRouter::new(config.buffer_size, CALLBACK_TIMEOUT, CALLBACK_TIMEOUT);
        Arc::new(CachingLockService::new(Arc::new(callbacks)))
    } else {
        Arc::new(BlockingLockService::new())
    };
    let server = NetworkServer::new(config.host.clone(), config.port, config.buffer_size);
    let spawned = LockServer::new(server, service).spawn().await?;
    info!(
        address = %spawned.local_addr(),
        caching = config.caching,
        "Lock server started"
    );
    Ok(spawned)
}

/// A running transaction server and, with a lock cache, its callback endpoint.
pub struct YdbNode {
    pub ydb_server: SpawnedServer,
    pub callback_server: Option<SpawnedServer>,
}

impl YdbNode {
    pub fn local_addr(&self) -> SocketAddr {
        self.ydb_server.local_addr()
    }

    pub async fn join(self) -> Result<(), anyhow::Error> {
        self.ydb_server.join().await?;
        Ok(())
    }

    pub async fn kill(self) -> Result<(), anyhow::Error> {
        self.ydb_server.kill().await?;
        if let Some(callback_server) = self.callback_server {
            callback_server.kill().await?;
        }
        Ok(())
    }
}

/// The callback endpoint doubles as the client id, so its port has to be
/// known before the lock client exists.
fn callback_port(config: &YdbServerConfig) -> Result<u16, anyhow::Error> {
    if config.callback_port != 0 {
        return Ok(config.callback_port);
    }
    let listener = TcpListener::bind((config.callback_host.as_str(), 0))?;
    Ok(listener.local_addr()?.port())
}

/// Connect to the lock service named in `config` and serve transactions on
/// `config.host:config.port` over a fresh in-memory store.
pub async fn start_ydb_server(config: &YdbServerConfig) -> Result<YdbNode, anyhow::Error> {
    let lock_service: Arc<dyn LockServiceApi> =
        Arc::new(NetworkLockServiceClient::new(NetworkClient::new(
            config.lock_server_address.clone(),
            config.buffer_size,
            config.send_timeout,
            config.recv_timeout,
        )));

    let (locks, callback_server): (Arc<dyn LockClient>, Option<SpawnedServer>) = if config.lock_cache {
        let port = callback_port(config)?;
        let client_id = ClientId::new(format!("{}:{}", config.callback_host, port));
        let client = Arc::new(CachingLockClient::new(client_id.clone(), lock_service));
        let handler: Arc<dyn LockCallbackHandler> = client.clone();
        let server = NetworkServer::new(config.callback_host.clone(), port, config.buffer_size);
        let spawned = CallbackServer::new(server, handler).spawn().await?;
        info!(client = %client_id, "Callback endpoint started");
        let locks: Arc<dyn LockClient> = client;
        (locks, Some(spawned))
    } else {
        let client_id = ClientId::new(format!("{}:{}", config.host, config.port));
        let locks: Arc<dyn LockClient> = Arc::new(RemoteLockClient::new(client_id, lock_service));
        (locks, None)
    };

    let store = KeyValueStore::new(Arc::new(InMemoryExtentStore::new()));
    let coordinator: Arc<dyn TransactionCoordinator> = match config.concurrency {
        ConcurrencyControl::TwoPhaseLocking => Arc::new(TwoPhaseCoordinator::new(locks, store)),
        ConcurrencyControl::Optimistic => Arc::new(OptimisticCoordinator::new(locks, store)),
    };

    let server = NetworkServer::new(config.host.clone(), config.port, config.buffer_size);
    let ydb_server = YdbServer::new(server, coordinator).spawn().await?;
    info!(
        address = %ydb_server.local_addr(),
        concurrency = ?config.concurrency,
        lock_cache = config.lock_cache,
        "YDB server started"
    );
    Ok(YdbNode {
        ydb_server,
        callback_server,
    })
}
