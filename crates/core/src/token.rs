// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The token record, the universal unit of master state.

use serde::{Deserialize, Serialize};

/// Sentinel expiration meaning "never expires".
pub const EXPIRATION_NEVER: i64 = i64::MAX;

/// A named, versioned record stored in the token master.
///
/// Version 0 means "new, not yet assigned by the master". Every successful
/// mutation assigns a fresh version strictly greater than any version the
/// master has issued before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default)]
    pub version: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Seconds since the epoch; [`EXPIRATION_NEVER`] for singleton tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    /// Higher priority tokens sort earlier in queries.
    #[serde(default)]
    pub priority: f64,
    /// Serialized payload, see [`crate::data::TokenPayload`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Token {
    /// Create a fresh, unversioned token with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 0,
            name: name.into(),
            owner: None,
            expiration_time: None,
            priority: 0.0,
            data: None,
        }
    }

    /// Create a fresh token carrying a serialized payload.
    pub fn with_data(name: impl Into<String>, data: impl Into<String>) -> Self {
        let mut token = Self::new(name);
        token.data = Some(data.into());
        token
    }

    /// A token is owned iff it has an owner and its lease has not lapsed.
    pub fn is_owned(&self, now_secs: i64) -> bool {
        self.owner.is_some() && self.expiration_time.is_some_and(|exp| exp > now_secs)
    }

    /// Drop ownership fields, releasing any lease.
    pub fn unown(&mut self) {
        self.owner = None;
        self.expiration_time = None;
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Token(name={}, version={}, owner={}, expiration={}, priority={})",
            self.name,
            self.version,
            self.owner.as_deref().unwrap_or("-"),
            self.expiration_time
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.priority,
        )
    }
}

crate::builder! {
    pub struct TokenBuilder => Token {
        into {
            name: String = "/workflow/wf/123/job/waiting/some_job",
        }
        set {
            version: i64 = 0,
            priority: f64 = 0.0,
        }
        option {
            owner: String = None,
            expiration_time: i64 = None,
            data: String = None,
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
