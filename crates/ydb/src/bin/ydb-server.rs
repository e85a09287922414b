// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ydb::config::{ConcurrencyControl, Config, YdbServerConfig};
use ydb::start_ydb_server;

#[derive(Clone, Copy, ValueEnum)]
enum Concurrency {
    /// Strict two-phase locking with deadlock detection
    #[value(name = "2pl")]
    TwoPhaseLocking,
    /// Optimistic concurrency control with commit-time validation
    #[value(name = "occ")]
    Optimistic,
}

impl From<Concurrency> for ConcurrencyControl {
    fn from(concurrency: Concurrency) -> Self {
        match concurrency {
            Concurrency::TwoPhaseLocking => ConcurrencyControl::TwoPhaseLocking,
            Concurrency::Optimistic => ConcurrencyControl::Optimistic,
        }
    }
}

#[derive(Parser)]
#[clap(
    name = "YDB Server",
    about = "Transactional key/value server",
    rename_all = "kebab-case"
)]
struct YdbServerOpt {
    /// Config file location, created with defaults when missing
    #[clap(long, default_value = "ydb_server.conf")]
    config: PathBuf,

    #[clap(long)]
    host: Option<String>,

    #[clap(long)]
    port: Option<u16>,

    #[clap(long, help = "Specify host:port of the lock server")]
    lock_server: Option<String>,

    #[clap(long, value_enum)]
    concurrency: Option<Concurrency>,

    #[clap(long, help = "Talk to a blocking lock server without caching locks")]
    no_lock_cache: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let options = YdbServerOpt::parse();
    let mut config = YdbServerConfig::read_or_create(&options.config)?;
    if let Some(host) = options.host {
        config.host = host;
    }
    if let Some(port) = options.port {
        config.port = port;
    }
    if let Some(lock_server) = options.lock_server {
        config.lock_server_address = lock_server;
    }
    if let Some(concurrency) = options.concurrency {
        config.concurrency = concurrency.into();
    }
    if options.no_lock_cache {
        config.lock_cache = false;
    }

    let node = start_ydb_server(&config).await?;
    info!("YDB server listening on {}", node.local_addr());
    node.join().await?;
    Ok(())
}
