// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clients talking to the token master.
//!
//! Both clients expose the same uniform `call` plus typed helpers. Master
//! transaction failures surface as [`ClientError::Master`]; the transport
//! layer (remote client only) reconnects with capped, jittered exponential
//! backoff and retries the failed call exactly once.

use async_trait::async_trait;
use pb_core::{Clock, PinballConfig, Token};
use pb_store::Store;
use pb_wire::{
    read_message, write_message, ErrorCode, ProtocolError, Query, Request, Response,
    TokenMasterError,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::handler::MasterHandler;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The master rejected the transaction.
    #[error(transparent)]
    Master(#[from] TokenMasterError),
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
    #[error("connect to {addr} failed after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        source: std::io::Error,
    },
    #[error("unexpected response to {request} request")]
    UnexpectedResponse { request: &'static str },
}

impl ClientError {
    /// The master error code, if this is a transaction failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Master(err) => Some(err.code),
            _ => None,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        self.code() == Some(ErrorCode::VersionConflict)
    }
}

/// Uniform request dispatch to a token master.
#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Send one request. Implementations normalize master-side failures
    /// into [`ClientError::Master`], so a returned `Response` is always a
    /// success variant.
    async fn call(&self, request: Request) -> Result<Response, ClientError>;

    async fn query(&self, queries: Vec<Query>) -> Result<Vec<Vec<Token>>, ClientError> {
        match self.call(Request::Query { queries }).await? {
            Response::Tokens { tokens } => Ok(tokens),
            _ => Err(ClientError::UnexpectedResponse { request: "query" }),
        }
    }

    /// Query a single prefix and flatten the result.
    async fn query_prefix(&self, name_prefix: &str) -> Result<Vec<Token>, ClientError> {
        let mut results = self.query(vec![Query::prefix(name_prefix)]).await?;
        Ok(results.pop().unwrap_or_default())
    }

    async fn modify(
        &self,
        updates: Vec<Token>,
        deletes: Vec<Token>,
    ) -> Result<Vec<Token>, ClientError> {
        match self.call(Request::Modify { updates, deletes }).await? {
            Response::Modified { updates } => Ok(updates),
            _ => Err(ClientError::UnexpectedResponse { request: "modify" }),
        }
    }

    async fn archive(&self, tokens: Vec<Token>) -> Result<(), ClientError> {
        match self.call(Request::Archive { tokens }).await? {
            Response::Archived => Ok(()),
            _ => Err(ClientError::UnexpectedResponse { request: "archive" }),
        }
    }

    async fn group(
        &self,
        name_prefix: &str,
        group_suffix: Option<&str>,
    ) -> Result<BTreeMap<String, i64>, ClientError> {
        let request = Request::Group {
            name_prefix: name_prefix.to_string(),
            group_suffix: group_suffix.map(str::to_string),
        };
        match self.call(request).await? {
            Response::Group { counts } => Ok(counts),
            _ => Err(ClientError::UnexpectedResponse { request: "group" }),
        }
    }

    async fn query_and_own(
        &self,
        query: Query,
        owner: &str,
        expiration_time: i64,
    ) -> Result<Vec<Token>, ClientError> {
        let request = Request::QueryAndOwn {
            query,
            owner: owner.to_string(),
            expiration_time,
        };
        match self.call(request).await? {
            Response::Owned { tokens } => Ok(tokens),
            _ => Err(ClientError::UnexpectedResponse {
                request: "query_and_own",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Local client
// ---------------------------------------------------------------------------

/// Client calling a master living in the same address space.
pub struct LocalClient<S: Store, C: Clock> {
    handler: Arc<MasterHandler<S, C>>,
}

impl<S: Store, C: Clock> LocalClient<S, C> {
    pub fn new(handler: Arc<MasterHandler<S, C>>) -> Self {
        Self { handler }
    }
}

impl<S: Store, C: Clock> Clone for LocalClient<S, C> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

#[async_trait]
impl<S: Store, C: Clock> MasterClient for LocalClient<S, C> {
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        self.handler.process(request).map_err(ClientError::Master)
    }
}

// ---------------------------------------------------------------------------
// Remote client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    /// Per-operation timeout; also the initial reconnect backoff.
    pub timeout: Duration,
    pub connect_attempts: u32,
    pub max_backoff: Duration,
}

impl RemoteClientConfig {
    pub fn from_config(config: &PinballConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.client_timeout_sec),
            connect_attempts: config.client_connect_attempts.max(1),
            max_backoff: Duration::from_secs(config.max_backoff_client_reconnect_sec),
        }
    }
}

/// Client speaking the wire protocol over a single pooled connection.
pub struct RemoteClient {
    addr: String,
    config: RemoteClientConfig,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl RemoteClient {
    pub fn new(addr: impl Into<String>, config: RemoteClientConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// Connect with doubling, ±50% jittered backoff, capped per sleep.
    async fn connect(&self) -> Result<TcpStream, ClientError> {
        let mut backoff = self.config.timeout;
        let attempts = self.config.connect_attempts;
        let mut last_error = std::io::Error::new(std::io::ErrorKind::Other, "no attempts made");
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.timeout, TcpStream::connect(&self.addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(err)) => last_error = err,
                Err(_) => {
                    last_error =
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
                }
            }
            if attempt == attempts {
                break;
            }
            let sleep = jittered(backoff).min(self.config.max_backoff);
            tracing::warn!(
                addr = %self.addr,
                attempt,
                attempts,
                "failed to reach master, reconnecting in {:.1}s",
                sleep.as_secs_f64()
            );
            tokio::time::sleep(sleep).await;
            backoff *= 2;
        }
        Err(ClientError::Connect {
            addr: self.addr.clone(),
            attempts,
            source: last_error,
        })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        request: &Request,
    ) -> Result<Response, ProtocolError> {
        let io = async {
            write_message(stream, request).await?;
            read_message(stream).await
        };
        match tokio::time::timeout(self.config.timeout, io).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "master call timed out",
            ))),
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..=1.5);
    base.mul_f64(factor)
}

fn interpret(response: Response) -> Result<Response, ClientError> {
    match response {
        Response::Error(err) => Err(ClientError::Master(err)),
        other => Ok(other),
    }
}

#[async_trait]
impl MasterClient for RemoteClient {
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        if let Some(stream) = guard.as_mut() {
            match self.exchange(stream, &request).await {
                Ok(response) => return interpret(response),
                Err(err) => {
                    tracing::warn!(error = %err, "master call failed, reconnecting once");
                    *guard = None;
                }
            }
        }

        // Reconnect and retry the call exactly once.
        let mut stream = self.connect().await?;
        let response = self.exchange(&mut stream, &request).await?;
        *guard = Some(stream);
        interpret(response)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
