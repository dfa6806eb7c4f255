// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared plumbing for the Pinball command line tools.

pub mod output;

use pb_core::PinballConfig;
use pb_master::{RemoteClient, RemoteClientConfig};

/// Remote client for the master named by the configuration, with optional
/// host/port overrides from the command line.
pub fn remote_client(
    config: &PinballConfig,
    host: Option<&str>,
    port: Option<u16>,
) -> RemoteClient {
    let host = host.unwrap_or(&config.master_host);
    let port = port.unwrap_or(config.master_port);
    RemoteClient::new(
        format!("{host}:{port}"),
        RemoteClientConfig::from_config(config),
    )
}

/// Install the tracing subscriber used by every binary.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
