// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use futures::future::{self, FutureExt};
use pretty_assertions::assert_eq;
use ydb_types::error::AbortReason;

struct ReplyHandler;

impl MessageHandler for ReplyHandler {
    fn handle_message<'a>(&'a self, buffer: &'a [u8]) -> future::BoxFuture<'a, Option<Vec<u8>>> {
        async move {
            let reply = match deserialize_message(buffer) {
                Ok(SerializedMessage::LockStat(lock_id)) => {
                    serialize_message(&SerializedMessage::LockStatResp(lock_id as i32))
                }
                _ => serialize_error(&YdbError::TransactionAborted {
                    transaction_id: 3,
                    reason: AbortReason::ValidationFailed,
                }),
            };
            Some(reply)
        }
        .boxed()
    }
}

fn client_for(address: String) -> NetworkClient {
    NetworkClient::new(
        address,
        65_000,
        Duration::from_secs(2),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_send_recv() {
    let server = spawn_server("127.0.0.1:0", ReplyHandler, 65_000)
        .await
        .unwrap();
    let client = client_for(server.local_addr().to_string());

    let reply = client.send_recv(&SerializedMessage::LockStat(9)).await;
    assert_eq!(reply, Ok(SerializedMessage::LockStatResp(9)));

    // Errors produced by the handler come back as `Err`.
    let reply = client.send_recv(&SerializedMessage::Ack).await;
    assert_eq!(
        reply,
        Err(YdbError::TransactionAborted {
            transaction_id: 3,
            reason: AbortReason::ValidationFailed,
        })
    );
    server.kill().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_peer_is_transport_error() {
    let port = PortAllocator::new(12_000).next_port().unwrap();
    let client = client_for(format!("127.0.0.1:{port}"));
    let error = client.send_recv(&SerializedMessage::Ack).await.unwrap_err();
    assert!(error.is_transport(), "{error:?}");
}

#[test]
fn test_port_allocator_skips_used_ports() {
    let mut allocator = PortAllocator::new(13_000);
    let first = allocator.next_port().unwrap();
    let second = allocator.next_port().unwrap();
    assert!(second > first);
}
