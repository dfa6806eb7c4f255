// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors the master reports to its callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request; never retried by clients.
    InputError,
    /// Named token missing.
    NotFound,
    /// Optimistic-concurrency failure; callers re-read and retry.
    VersionConflict,
}

pb_core::simple_display! {
    ErrorCode {
        InputError => "INPUT_ERROR",
        NotFound => "NOT_FOUND",
        VersionConflict => "VERSION_CONFLICT",
    }
}

/// An error raised by a master transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TokenMasterError {
    pub code: ErrorCode,
    pub message: String,
}

impl TokenMasterError {
    pub fn input_error(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InputError,
            message: message.into(),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: format!("token {name} not found"),
        }
    }

    pub fn version_conflict(name: &str, existing_version: i64) -> Self {
        Self {
            code: ErrorCode::VersionConflict,
            message: format!("token {name} with different version {existing_version} found"),
        }
    }
}
