// Copyright (c) Facebook, Inc. and its affiliates.
// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::*;

#[cfg(test)]
#[path = "unit_tests/transport_tests.rs"]
mod transport_tests;

/// Suggested buffer size
pub const DEFAULT_MAX_DATAGRAM_SIZE: &str = "65507";

/// The handler required to create a service.
pub trait MessageHandler {
    fn handle_message<'a>(&'a self, buffer: &'a [u8]) -> future::BoxFuture<'a, Option<Vec<u8>>>;
}

/// The result of spawning a server is oneshot channel to kill it and a handle to track completion.
pub struct SpawnedServer {
    complete: futures::channel::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), io::Error>>,
    local_addr: SocketAddr,
}

impl SpawnedServer {
    /// The address the server actually listens on, useful when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn join(self) -> Result<(), io::Error> {
        // Note that dropping `self.complete` would terminate the server.
        self.handle.await??;
        Ok(())
    }

    pub async fn kill(self) -> Result<(), io::Error> {
        // The server may already be gone, in which case there is nobody to notify.
        let _ = self.complete.send(());
        self.handle.await??;
        Ok(())
    }
}

/// Create a DataStream for this protocol.
pub async fn connect(address: &str, max_data_size: usize) -> Result<TcpDataStream, io::Error> {
    TcpDataStream::connect(address, max_data_size).await
}

/// Run a server for this protocol and the given message handler.
pub async fn spawn_server<S>(
    address: &str,
    state: S,
    buffer_size: usize,
) -> Result<SpawnedServer, io::Error>
where
    S: MessageHandler + Send + Sync + 'static,
{
    let (complete, receiver) = futures::channel::oneshot::channel();
    // see https://fly.io/blog/the-tokio-1-x-upgrade/#tcplistener-from_std-needs-to-be-set-to-nonblocking
    let std_listener = std::net::TcpListener::bind(address)?;
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(run_tcp_server(
        listener,
        Arc::new(state),
        receiver,
        buffer_size,
    ));
    Ok(SpawnedServer {
        complete,
        handle,
        local_addr,
    })
}

fn make_codec(max_data_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_data_size)
        .new_codec()
}

/// An implementation of DataStream based on TCP, one length-delimited frame per message.
pub struct TcpDataStream {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl TcpDataStream {
    async fn connect(address: &str, max_data_size: usize) -> Result<Self, io::Error> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, max_data_size))
    }

    fn from_stream(stream: TcpStream, max_data_size: usize) -> Self {
        Self {
            framed: Framed::new(stream, make_codec(max_data_size)),
        }
    }

    pub async fn write_data<'a>(&'a mut self, buffer: &'a [u8]) -> Result<(), io::Error> {
        self.framed.send(Bytes::copy_from_slice(buffer)).await
    }

    /// Read the next frame, `None` once the peer closed the connection.
    pub async fn read_data(&mut self) -> Option<Result<Vec<u8>, io::Error>> {
        self.framed
            .next()
            .await
            .map(|frame| frame.map(|bytes| bytes.to_vec()))
    }
}

// Server implementation for TCP.
async fn run_tcp_server<S>(
    listener: TcpListener,
    state: Arc<S>,
    mut exit_future: futures::channel::oneshot::Receiver<()>,
    buffer_size: usize,
) -> Result<(), io::Error>
where
    S: MessageHandler + Send + Sync + 'static,
{
    loop {
        let (stream, _) = match future::select(exit_future, Box::pin(listener.accept())).await {
            future::Either::Left(_) => break,
            future::Either::Right((value, new_exit_future)) => {
                exit_future = new_exit_future;
                value?
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let mut stream = TcpDataStream::from_stream(stream, buffer_size);
            while let Some(frame) = stream.read_data().await {
                let buffer = match frame {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        error!("Error while reading TCP stream: {}", err);
                        break;
                    }
                };

                if let Some(reply) = state.handle_message(&buffer[..]).await {
                    if let Err(error) = stream.write_data(&reply[..]).await {
                        error!("Failed to send query response: {}", error);
                        break;
                    }
                };
            }
        });
    }
    Ok(())
}
