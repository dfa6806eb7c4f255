// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::{ClientError, MasterClient, RemoteClient, RemoteClientConfig};
use crate::handler::MasterHandler;
use crate::serve;
use pb_core::{SystemClock, Token};
use pb_store::SqliteStore;
use pb_wire::{read_message, write_message, ErrorCode, Query, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn test_config() -> RemoteClientConfig {
    RemoteClientConfig {
        timeout: Duration::from_millis(500),
        connect_attempts: 3,
        max_backoff: Duration::from_millis(200),
    }
}

async fn start_master() -> (String, Arc<MasterHandler<SqliteStore, SystemClock>>) {
    let store = Arc::new(SqliteStore::in_memory("server_test").unwrap());
    let handler = Arc::new(MasterHandler::new(store, SystemClock).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let serving = Arc::clone(&handler);
    tokio::spawn(async move {
        let _ = serve(listener, serving).await;
    });
    (addr, handler)
}

#[tokio::test]
async fn remote_client_round_trips_requests() {
    let (addr, _handler) = start_master().await;
    let client = RemoteClient::new(addr, test_config());

    let updates = client
        .modify(vec![Token::with_data("/a", "payload")], vec![])
        .await
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert!(updates[0].version > 0);

    let tokens = client.query_prefix("/a").await.unwrap();
    assert_eq!(tokens, updates);

    let counts = client.group("/", Some("/")).await.unwrap();
    assert!(!counts.is_empty());
}

#[tokio::test]
async fn master_errors_cross_the_wire_with_their_code() {
    let (addr, _handler) = start_master().await;
    let client = RemoteClient::new(addr, test_config());

    let err = client
        .modify(vec![], vec![Token::new("/a")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InputError));

    let err = client
        .modify(vec![], vec![{
            let mut t = Token::new("/ghost");
            t.version = 4;
            t
        }])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn client_reconnects_and_retries_once_after_a_dropped_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let store = Arc::new(SqliteStore::in_memory("retry_test").unwrap());
    let handler = Arc::new(MasterHandler::new(store, SystemClock).unwrap());

    let serving = Arc::clone(&handler);
    tokio::spawn(async move {
        // First connection: read the request, then hang up without
        // responding. Second connection: serve properly.
        let (mut first, _) = listener.accept().await.unwrap();
        let _: Request = read_message(&mut first).await.unwrap();
        drop(first);

        let (mut second, _) = listener.accept().await.unwrap();
        loop {
            let request: Request = match read_message(&mut second).await {
                Ok(request) => request,
                Err(_) => return,
            };
            let response = match serving.process(request) {
                Ok(response) => response,
                Err(err) => Response::Error(err),
            };
            write_message(&mut second, &response).await.unwrap();
        }
    });

    let client = RemoteClient::new(addr, test_config());
    // The first exchange dies mid-call; the client must reconnect and
    // retry exactly once, transparently.
    let tokens = client.query(vec![Query::prefix("/")]).await.unwrap();
    assert_eq!(tokens.len(), 1);
}

#[tokio::test]
async fn connect_gives_up_after_the_configured_attempts() {
    // A port with nothing listening: bind, snatch the address, drop.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = RemoteClient::new(
        addr,
        RemoteClientConfig {
            timeout: Duration::from_millis(50),
            connect_attempts: 2,
            max_backoff: Duration::from_millis(50),
        },
    );
    let err = client.query(vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { attempts: 2, .. }));
}
