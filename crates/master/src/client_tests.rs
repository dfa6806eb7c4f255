// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::handler::MasterHandler;
use pb_core::{FakeClock, Token};
use pb_store::SqliteStore;
use pb_wire::ErrorCode;

fn local_client() -> (LocalClient<SqliteStore, FakeClock>, FakeClock) {
    let store = Arc::new(SqliteStore::in_memory("client_test").unwrap());
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000);
    let handler = Arc::new(MasterHandler::new(store, clock.clone()).unwrap());
    (LocalClient::new(handler), clock)
}

#[tokio::test]
async fn local_client_exposes_typed_helpers() {
    let (client, clock) = local_client();

    let updates = client
        .modify(
            vec![
                Token::with_data("/workflow/wf/1/job/runnable/a", "x"),
                Token::with_data("/workflow/wf/1/job/runnable/b", "y"),
            ],
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(updates.len(), 2);

    let tokens = client.query_prefix("/workflow/wf/1/job/").await.unwrap();
    assert_eq!(tokens.len(), 2);

    let counts = client.group("/workflow/", Some("/")).await.unwrap();
    assert_eq!(counts.get("/workflow/wf/"), Some(&2));

    let owned = client
        .query_and_own(
            Query::with_max("/workflow/wf/1/job/runnable/", 1),
            "worker_1",
            clock.epoch_secs() + 60,
        )
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].owner.as_deref(), Some("worker_1"));

    let unowned = tokens
        .iter()
        .find(|t| t.name != owned[0].name)
        .cloned()
        .unwrap();
    client.archive(vec![unowned]).await.unwrap();
}

#[tokio::test]
async fn master_failures_carry_their_error_code() {
    let (client, _clock) = local_client();
    let stale = {
        let mut t = Token::new("/a");
        t.version = 999;
        t
    };
    let err = client.modify(vec![stale], vec![]).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotFound));
    assert!(!err.is_version_conflict());

    let current = client
        .modify(vec![Token::new("/a")], vec![])
        .await
        .unwrap()
        .remove(0);
    client.modify(vec![current.clone()], vec![]).await.unwrap();
    let err = client.modify(vec![current], vec![]).await.unwrap_err();
    assert!(err.is_version_conflict());
}

#[tokio::test]
async fn query_prefix_of_missing_prefix_is_empty() {
    let (client, _clock) = local_client();
    assert!(client.query_prefix("/nothing/").await.unwrap().is_empty());
}
