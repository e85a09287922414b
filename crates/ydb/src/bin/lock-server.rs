// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ydb::config::{Config, LockServerConfig};
use ydb::start_lock_server;

#[derive(Parser)]
#[clap(
    name = "YDB Lock Server",
    about = "Lock service for YDB servers",
    rename_all = "kebab-case"
)]
struct LockServerOpt {
    /// Config file location, created with defaults when missing
    #[clap(long, default_value = "lock_server.conf")]
    config: PathBuf,

    #[clap(long)]
    host: Option<String>,

    #[clap(long)]
    port: Option<u16>,

    #[clap(long, help = "Serve non-caching clients: acquire blocks until granted")]
    blocking: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let options = LockServerOpt::parse();
    let mut config = LockServerConfig::read_or_create(&options.config)?;
    if let Some(host) = options.host {
        config.host = host;
    }
    if let Some(port) = options.port {
        config.port = port;
    }
    if options.blocking {
        config.caching = false;
    }

    let server = start_lock_server(&config).await?;
    info!("Lock server listening on {}", server.local_addr());
    server.join().await?;
    Ok(())
}
