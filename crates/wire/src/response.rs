// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Responses from the token master.

use crate::error::TokenMasterError;
use pb_core::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response from the master to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Archive completed.
    Archived,

    /// Group counts keyed by group name.
    Group { counts: BTreeMap<String, i64> },

    /// Updated tokens with their assigned versions, in input order.
    Modified { updates: Vec<Token> },

    /// Per-query result lists, aligned with the request's queries.
    Tokens { tokens: Vec<Vec<Token>> },

    /// Tokens claimed by a QueryAndOwn.
    Owned { tokens: Vec<Token> },

    /// Transaction failure.
    Error(TokenMasterError),
}
