// Copyright (c) 2021, Facebook, Inc. and its affiliates
// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::transport::*;
use std::{
    io,
    net::TcpListener,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::time;
use tracing::{debug, info};
use ydb_types::{error::*, serialize::*};

#[cfg(test)]
#[path = "unit_tests/network_tests.rs"]
mod network_tests;

/// Request/response client towards one remote endpoint.
///
/// Every call opens its own connection, so concurrent calls never queue
/// behind each other, which matters for calls that block on the server side.
#[derive(Clone, Debug)]
pub struct NetworkClient {
    address: String,
    buffer_size: usize,
    send_timeout: Duration,
    recv_timeout: Duration,
}

impl NetworkClient {
    pub fn new(
        address: String,
        buffer_size: usize,
        send_timeout: Duration,
        recv_timeout: Duration,
    ) -> Self {
        NetworkClient {
            address,
            buffer_size,
            send_timeout,
            recv_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn send_recv_bytes_internal(&self, buf: Vec<u8>) -> Result<Option<Vec<u8>>, io::Error> {
        let mut stream = connect(&self.address, self.buffer_size).await?;
        // Send message
        time::timeout(self.send_timeout, stream.write_data(&buf)).await??;
        // Wait for reply
        time::timeout(self.recv_timeout, async {
            stream.read_data().await.transpose()
        })
        .await?
    }

    pub async fn send_recv_bytes(&self, buf: Vec<u8>) -> YdbResult<SerializedMessage> {
        parse_recv_bytes(&self.address, self.send_recv_bytes_internal(buf).await)
    }

    pub async fn send_recv(&self, message: &SerializedMessage) -> YdbResult<SerializedMessage> {
        debug!(address = %self.address, ?message, "Sending request");
        self.send_recv_bytes(serialize_message(message)).await
    }
}

pub fn parse_recv_bytes(
    address: &str,
    response: Result<Option<Vec<u8>>, io::Error>,
) -> YdbResult<SerializedMessage> {
    match response {
        Err(error) => Err(YdbError::ClientIoError {
            error: format!("{address}: {error}"),
        }),
        Ok(Some(response)) => deserialize_reply(&response[..]),
        Ok(None) => Err(YdbError::ClientIoError {
            error: format!("{address}: empty response"),
        }),
    }
}

/// Listening address plus request counters shared by the RPC front ends.
pub struct NetworkServer {
    pub base_address: String,
    pub base_port: u16,
    pub buffer_size: usize,
    // Stats
    packets_processed: AtomicUsize,
    user_errors: AtomicUsize,
}

impl NetworkServer {
    pub fn new(base_address: String, base_port: u16, buffer_size: usize) -> Self {
        Self {
            base_address,
            base_port,
            buffer_size,
            packets_processed: AtomicUsize::new(0),
            user_errors: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.base_address, self.base_port)
    }

    pub fn packets_processed(&self) -> usize {
        self.packets_processed.load(Ordering::Relaxed)
    }

    pub fn increment_packets_processed(&self) {
        let processed = self.packets_processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % 5000 == 0 {
            info!(
                "{}:{} has processed {} packets",
                self.base_address, self.base_port, processed
            );
        }
    }

    pub fn user_errors(&self) -> usize {
        self.user_errors.load(Ordering::Relaxed)
    }

    pub fn increment_user_errors(&self) {
        self.user_errors.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PortAllocator {
    next_port: u16,
}

impl PortAllocator {
    pub fn new(starting_port: u16) -> Self {
        Self {
            next_port: starting_port,
        }
    }
    pub fn next_port(&mut self) -> Option<u16> {
        for port in self.next_port..65535 {
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                self.next_port = port + 1;
                return Some(port);
            }
        }
        None
    }
}
