// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::{decode, encode, Request};
use pb_core::Token;
use proptest::prelude::*;

fn arb_token() -> impl Strategy<Value = Token> {
    (
        0i64..1_000_000,
        "[a-z_/]{1,40}",
        proptest::option::of("[a-z0-9_]{1,20}"),
        proptest::option::of(0i64..10_000_000),
        -100.0f64..100.0,
        proptest::option::of("[ -~]{0,200}"),
    )
        .prop_map(|(version, name, owner, expiration_time, priority, data)| Token {
            version,
            name,
            owner,
            expiration_time,
            priority,
            data,
        })
}

proptest! {
    #[test]
    fn modify_requests_survive_encode_decode(
        updates in proptest::collection::vec(arb_token(), 0..8),
        deletes in proptest::collection::vec(arb_token(), 0..8),
    ) {
        let request = Request::Modify { updates, deletes };
        let frame = encode(&request).unwrap();
        let parsed: Request = decode(&frame[4..]).unwrap();
        prop_assert_eq!(parsed, request);
    }
}
