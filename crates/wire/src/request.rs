// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests accepted by the token master.

use pb_core::Token;
use serde::{Deserialize, Serialize};

/// A prefix query over token names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub name_prefix: String,
    /// When set, results are capped and ordered by priority descending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Query {
    pub fn prefix(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            max_tokens: None,
        }
    }

    pub fn with_max(name_prefix: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            max_tokens: Some(max_tokens),
        }
    }
}

/// Request from a client to the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Move tokens from the active to the archived table.
    Archive { tokens: Vec<Token> },

    /// Count tokens under a prefix, grouped at `group_suffix`.
    Group {
        name_prefix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_suffix: Option<String>,
    },

    /// Atomically apply token updates and deletes.
    Modify {
        #[serde(default)]
        updates: Vec<Token>,
        #[serde(default)]
        deletes: Vec<Token>,
    },

    /// Read tokens matching a batch of prefix queries.
    Query { queries: Vec<Query> },

    /// Atomically claim unowned tokens under a prefix.
    QueryAndOwn {
        query: Query,
        owner: String,
        expiration_time: i64,
    },
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Archive { .. } => "archive",
            Request::Group { .. } => "group",
            Request::Modify { .. } => "modify",
            Request::Query { .. } => "query",
            Request::QueryAndOwn { .. } => "query_and_own",
        }
    }
}
