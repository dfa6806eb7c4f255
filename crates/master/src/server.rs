// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP front end for the master handler.

use crate::handler::MasterHandler;
use pb_core::Clock;
use pb_store::Store;
use pb_wire::{read_message, write_message, ProtocolError, Request, Response};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Accept connections forever, serving each on its own task.
pub async fn serve<S: Store, C: Clock>(
    listener: TcpListener,
    handler: Arc<MasterHandler<S, C>>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            tracing::debug!(%peer, "client connected");
            if let Err(err) = serve_connection(stream, handler).await {
                match err {
                    ProtocolError::ConnectionClosed => {
                        tracing::debug!(%peer, "client disconnected");
                    }
                    err => tracing::warn!(%peer, error = %err, "connection failed"),
                }
            }
        });
    }
}

async fn serve_connection<S: Store, C: Clock>(
    mut stream: TcpStream,
    handler: Arc<MasterHandler<S, C>>,
) -> Result<(), ProtocolError> {
    loop {
        let request: Request = read_message(&mut stream).await?;
        let response = dispatch(&handler, request).await;
        write_message(&mut stream, &response).await?;
    }
}

/// Run the transaction off the I/O thread; the store commit inside may
/// block.
async fn dispatch<S: Store, C: Clock>(
    handler: &Arc<MasterHandler<S, C>>,
    request: Request,
) -> Response {
    let handler = Arc::clone(handler);
    let joined =
        tokio::task::spawn_blocking(move || handler.process(request)).await;
    match joined {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => Response::Error(err),
        Err(join_err) => Response::Error(pb_wire::TokenMasterError::input_error(format!(
            "transaction task failed: {join_err}"
        ))),
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
