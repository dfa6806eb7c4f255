// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pb-store: durable token tables behind the master.
//!
//! Two logical relations — active and archived — hold token rows; a third
//! keeps opaque cached blobs for archived-instance data. All mutating
//! operations are transactional at row granularity.

mod filter;
mod sqlite;

pub use filter::NameFilter;
pub use sqlite::SqliteStore;

use pb_core::Token;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("invalid master name {0:?}: only alphanumerics and underscores allowed")]
    InvalidMasterName(String),
}

/// A persistent token container.
///
/// Implementations must make each mutating call atomic: either every row
/// change lands or none do.
pub trait Store: Send + Sync + 'static {
    /// Upsert `updates` into and delete `deletes` from the active relation,
    /// atomically.
    fn commit_tokens(&self, updates: &[Token], deletes: &[Token]) -> Result<(), StoreError>;

    /// Move tokens from the active to the archived relation, atomically.
    fn archive_tokens(&self, tokens: &[Token]) -> Result<(), StoreError>;

    /// Remove tokens from the archived relation.
    fn delete_archived_tokens(&self, deletes: &[Token]) -> Result<(), StoreError>;

    fn read_active_tokens(&self, filter: &NameFilter) -> Result<Vec<Token>, StoreError>;

    fn read_archived_tokens(&self, filter: &NameFilter) -> Result<Vec<Token>, StoreError>;

    /// Union of active and archived tokens.
    fn read_tokens(&self, filter: &NameFilter) -> Result<Vec<Token>, StoreError> {
        let mut tokens = self.read_active_tokens(filter)?;
        tokens.extend(self.read_archived_tokens(filter)?);
        Ok(tokens)
    }

    fn read_active_token_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError>;

    fn read_archived_token_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError>;

    /// Union of active and archived token names.
    fn read_token_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError> {
        let mut names = self.read_active_token_names(filter)?;
        names.extend(self.read_archived_token_names(filter)?);
        Ok(names)
    }

    fn get_cached_data(&self, name: &str) -> Result<Option<String>, StoreError>;

    fn set_cached_data(&self, name: &str, data: &str) -> Result<(), StoreError>;

    fn read_cached_data_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError>;

    fn clear_cached_data(&self) -> Result<(), StoreError>;
}
