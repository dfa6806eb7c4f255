// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactions over the token map.
//!
//! Each request kind maps to one transaction. A transaction validates its
//! request against the current map, assigns fresh versions to every written
//! token, commits updates and deletes to the store in a single call, and
//! only then mirrors the changes into the map. If the store rejects a
//! commit after validation passed, the in-memory state can no longer be
//! trusted to match durable state and the process exits.

use crate::blessed::{BlessedVersion, BLESSED_VERSION_NAME};
use crate::trie::TokenTrie;
use pb_core::{Clock, Token};
use pb_store::{Store, StoreError};
use pb_wire::{Query, Request, Response, TokenMasterError};
use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct MasterState {
    pub trie: TokenTrie,
    pub blessed: BlessedVersion,
}

impl MasterState {
    pub fn process(
        &mut self,
        store: &impl Store,
        clock: &impl Clock,
        request: Request,
    ) -> Result<Response, TokenMasterError> {
        match request {
            Request::Query { queries } => self.query(&queries),
            Request::Group {
                name_prefix,
                group_suffix,
            } => self.group(&name_prefix, group_suffix.as_deref()),
            Request::Modify { updates, deletes } => self.modify(store, clock, updates, deletes),
            Request::Archive { tokens } => self.archive(store, tokens),
            Request::QueryAndOwn {
                query,
                owner,
                expiration_time,
            } => self.query_and_own(store, clock, &query, owner, expiration_time),
        }
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    fn query(&self, queries: &[Query]) -> Result<Response, TokenMasterError> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.matching_tokens(query));
        }
        Ok(Response::Tokens { tokens: results })
    }

    fn matching_tokens(&self, query: &Query) -> Vec<Token> {
        let mut tokens = self.trie.values_under(&query.name_prefix);
        if let Some(max) = query.max_tokens {
            sort_by_priority(&mut tokens);
            tokens.truncate(max);
        }
        tokens
    }

    // ------------------------------------------------------------------
    // Group
    // ------------------------------------------------------------------

    fn group(
        &self,
        name_prefix: &str,
        group_suffix: Option<&str>,
    ) -> Result<Response, TokenMasterError> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        if !name_prefix.is_empty() {
            for name in self.trie.names_under(name_prefix) {
                let group = group_of(&name, name_prefix, group_suffix);
                *counts.entry(group).or_insert(0) += 1;
            }
        }
        Ok(Response::Group { counts })
    }

    // ------------------------------------------------------------------
    // Modify
    // ------------------------------------------------------------------

    fn modify(
        &mut self,
        store: &impl Store,
        clock: &impl Clock,
        updates: Vec<Token>,
        deletes: Vec<Token>,
    ) -> Result<Response, TokenMasterError> {
        verify_have_version(&deletes)?;
        for token in updates.iter().chain(deletes.iter()) {
            verify_name(&token.name)?;
            self.verify_modifiable(token)?;
        }

        let mut assigned = Vec::with_capacity(updates.len());
        for token in updates {
            let mut token = token;
            token.version = self.blessed.advance(clock);
            assigned.push(token);
        }
        self.commit(store, clock, &assigned, &deletes);
        Ok(Response::Modified { updates: assigned })
    }

    /// A token with a version must exist in the map at that exact version;
    /// a token without a version must not exist at all.
    fn verify_modifiable(&self, token: &Token) -> Result<(), TokenMasterError> {
        match self.trie.get(&token.name) {
            Some(existing) => {
                if existing.version != token.version {
                    return Err(TokenMasterError::version_conflict(
                        &existing.name,
                        existing.version,
                    ));
                }
            }
            None => {
                if token.version != 0 {
                    return Err(TokenMasterError::not_found(&token.name));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Archive
    // ------------------------------------------------------------------

    fn archive(
        &mut self,
        store: &impl Store,
        tokens: Vec<Token>,
    ) -> Result<Response, TokenMasterError> {
        verify_have_version(&tokens)?;
        for token in &tokens {
            verify_name(&token.name)?;
            let existing = self
                .trie
                .get(&token.name)
                .ok_or_else(|| TokenMasterError::not_found(&token.name))?;
            if existing.version != token.version {
                return Err(TokenMasterError::version_conflict(
                    &existing.name,
                    existing.version,
                ));
            }
        }

        // A migration of identity, not a mutation: no new versions.
        if let Err(err) = store.archive_tokens(&tokens) {
            fatal_store_failure(&err);
        }
        for token in &tokens {
            self.trie.delete(&token.name);
        }
        Ok(Response::Archived)
    }

    // ------------------------------------------------------------------
    // QueryAndOwn
    // ------------------------------------------------------------------

    fn query_and_own(
        &mut self,
        store: &impl Store,
        clock: &impl Clock,
        query: &Query,
        owner: String,
        expiration_time: i64,
    ) -> Result<Response, TokenMasterError> {
        if owner.is_empty() {
            return Err(TokenMasterError::input_error("owner must not be empty"));
        }
        let now_secs = clock.epoch_secs();
        let mut candidates = self.trie.values_under(&query.name_prefix);
        sort_by_priority(&mut candidates);

        let mut claimed = Vec::new();
        for token in candidates {
            if query.max_tokens.is_some_and(|max| claimed.len() >= max) {
                break;
            }
            if token.is_owned(now_secs) {
                continue;
            }
            let mut token = token;
            token.owner = Some(owner.clone());
            token.expiration_time = Some(expiration_time);
            token.version = self.blessed.advance(clock);
            claimed.push(token);
        }
        self.commit(store, clock, &claimed, &[]);
        Ok(Response::Owned { tokens: claimed })
    }

    // ------------------------------------------------------------------
    // Shared write path
    // ------------------------------------------------------------------

    /// Persist updates + the advanced blessed version + deletes in one
    /// store commit, then mirror into the map.
    fn commit(
        &mut self,
        store: &impl Store,
        clock: &impl Clock,
        updates: &[Token],
        deletes: &[Token],
    ) {
        self.blessed.advance(clock);
        let mut to_store: Vec<Token> = updates.to_vec();
        to_store.push(self.blessed.token().clone());
        if let Err(err) = store.commit_tokens(&to_store, deletes) {
            fatal_store_failure(&err);
        }
        self.trie.put(self.blessed.token().clone());
        for token in updates {
            self.trie.put(token.clone());
        }
        for token in deletes {
            self.trie.delete(&token.name);
        }
    }
}

/// Order by priority descending; ties break by name so the order is
/// deterministic within a call.
fn sort_by_priority(tokens: &mut [Token]) {
    tokens.sort_by(|a, b| b.priority.total_cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
}

fn verify_have_version(tokens: &[Token]) -> Result<(), TokenMasterError> {
    for token in tokens {
        if token.version == 0 {
            return Err(TokenMasterError::input_error(format!(
                "token {} does not have version set",
                token.name
            )));
        }
    }
    Ok(())
}

fn verify_name(name: &str) -> Result<(), TokenMasterError> {
    if !name.starts_with('/') {
        return Err(TokenMasterError::input_error(format!(
            "token name {name} must start with /"
        )));
    }
    if name == BLESSED_VERSION_NAME {
        return Err(TokenMasterError::input_error(
            "the blessed version token cannot be modified directly",
        ));
    }
    Ok(())
}

/// Compute the group of a name: the substring up to and including the first
/// occurrence of `suffix` after the prefix, or the full name if absent.
fn group_of(name: &str, prefix: &str, suffix: Option<&str>) -> String {
    let Some(suffix) = suffix.filter(|s| !s.is_empty()) else {
        return name.to_string();
    };
    let start = prefix.len().min(name.len());
    match name[start..].find(suffix) {
        Some(pos) => name[..start + pos + suffix.len()].to_string(),
        None => name.to_string(),
    }
}

fn fatal_store_failure(err: &StoreError) -> ! {
    // The store diverged from the in-memory state after validation; the
    // only safe move is to restart and reload from the store.
    tracing::error!(error = %err, "store commit failed inside a transaction");
    std::process::exit(1);
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
