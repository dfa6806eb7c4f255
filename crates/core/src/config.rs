// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup configuration shared by every Pinball process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Configuration supplied at startup, loaded from a TOML file.
///
/// Every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinballConfig {
    pub master_host: String,
    pub master_port: u16,
    /// Identifies this master's tables in the shared database.
    pub master_name: String,
    /// Process generation, consulted by EXIT signals during rolling
    /// restarts.
    pub generation: u64,
    pub client_timeout_sec: u64,
    pub client_connect_attempts: u32,
    pub max_backoff_client_reconnect_sec: u64,
    pub worker_poll_time_sec: u64,
    /// Number of worker loops hosted by the launcher.
    pub workers: u32,
    pub ui_host: String,
    pub ui_port: u16,
    pub local_logs_dir: PathBuf,
    /// SQLite database file holding this master's token tables.
    pub store_path: PathBuf,
    /// Accepted for parity with deployments that upload logs; unused by the
    /// local log saver.
    pub s3_logs_dir: String,
    /// Registry identifier of the workflow parser.
    pub parser: String,
    pub parser_params: BTreeMap<String, String>,
    pub default_email: Option<String>,
    /// How long a finished instance lingers before the archiver moves it.
    pub archive_delay_sec: i64,
}

impl Default for PinballConfig {
    fn default() -> Self {
        Self {
            master_host: "127.0.0.1".to_string(),
            master_port: 9090,
            master_name: "pinball".to_string(),
            generation: 0,
            client_timeout_sec: 10,
            client_connect_attempts: 10,
            max_backoff_client_reconnect_sec: 60,
            worker_poll_time_sec: 5,
            workers: 2,
            ui_host: "127.0.0.1".to_string(),
            ui_port: 8080,
            local_logs_dir: PathBuf::from("/tmp/pinball/logs"),
            store_path: PathBuf::from("/tmp/pinball/tokens.db"),
            s3_logs_dir: String::new(),
            parser: "static".to_string(),
            parser_params: BTreeMap::new(),
            default_email: None,
            archive_delay_sec: 12 * 60 * 60,
        }
    }
}

impl PinballConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn master_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.master_port)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
