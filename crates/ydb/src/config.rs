// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[cfg(test)]
#[path = "unit_tests/config_tests.rs"]
mod config_tests;

pub const DEFAULT_BUFFER_SIZE: usize = 65507;
pub const DEFAULT_LOCK_SERVER_PORT: u16 = 9000;
pub const DEFAULT_YDB_SERVER_PORT: u16 = 9100;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(4);
/// Generous: a blocking lock service holds `acquire` replies until the lock
/// is granted.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeouts for `revoke` and `retry` deliveries.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(4);

pub trait Config
where
    Self: DeserializeOwned + Serialize,
{
    fn read_or_create(path: &Path) -> Result<Self, anyhow::Error> {
        let path_buf = PathBuf::from(path);
        Ok(if path_buf.exists() {
            trace!("Reading config from '{:?}'", path);
            let reader = BufReader::new(File::open(path_buf)?);
            let mut config: Self = serde_json::from_reader(reader)?;
            config.set_config_path(path);
            config
        } else {
            trace!("Config file not found, creating new config '{:?}'", path);
            let new_config = Self::create(path)?;
            new_config.write(path)?;
            new_config
        })
    }

    fn write(&self, path: &Path) -> Result<(), anyhow::Error> {
        trace!("Writing config to '{:?}'", path);
        let config = serde_json::to_string_pretty(self)?;
        fs::write(path, config)?;
        Ok(())
    }

    fn save(&self) -> Result<(), anyhow::Error> {
        self.write(self.config_path())
    }

    fn create(path: &Path) -> Result<Self, anyhow::Error>;

    fn set_config_path(&mut self, path: &Path);
    fn config_path(&self) -> &Path;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LockServerConfig {
    pub host: String,
    pub port: u16,
    /// Serve caching clients (retry and revoke) instead of blocking ones.
    pub caching: bool,
    pub buffer_size: usize,
    #[serde(skip)]
    config_path: PathBuf,
}

impl LockServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for LockServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_LOCK_SERVER_PORT,
            caching: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            config_path: PathBuf::new(),
        }
    }
}

impl Config for LockServerConfig {
    fn create(path: &Path) -> Result<Self, anyhow::Error> {
        Ok(Self {
            config_path: path.to_path_buf(),
            ..Default::default()
        })
    }

    fn set_config_path(&mut self, path: &Path) {
        self.config_path = path.to_path_buf();
    }

    fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyControl {
    TwoPhaseLocking,
    Optimistic,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct YdbServerConfig {
    pub host: String,
    pub port: u16,
    pub lock_server_address: String,
    /// Where the lock service reaches this server with callbacks. Only used
    /// with `lock_cache`; port 0 picks a free port.
    pub callback_host: String,
    pub callback_port: u16,
    pub concurrency: ConcurrencyControl,
    /// Cache locks locally. Requires a caching lock server.
    pub lock_cache: bool,
    pub buffer_size: usize,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    #[serde(skip)]
    config_path: PathBuf,
}

impl Default for YdbServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_YDB_SERVER_PORT,
            lock_server_address: format!("127.0.0.1:{DEFAULT_LOCK_SERVER_PORT}"),
            callback_host: "127.0.0.1".to_string(),
            callback_port: 0,
            concurrency: ConcurrencyControl::TwoPhaseLocking,
            lock_cache: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            config_path: PathBuf::new(),
        }
    }
}

impl Config for YdbServerConfig {
    fn create(path: &Path) -> Result<Self, anyhow::Error> {
        Ok(Self {
            config_path: path.to_path_buf(),
            ..Default::default()
        })
    }

    fn set_config_path(&mut self, path: &Path) {
        self.config_path = path.to_path_buf();
    }

    fn config_path(&self) -> &Path {
        &self.config_path
    }
}
