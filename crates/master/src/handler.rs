// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The master handler: load, then serialize transactions under one lock.

use crate::blessed::{BlessedVersion, BLESSED_VERSION_NAME};
use crate::transaction::MasterState;
use crate::trie::TokenTrie;
use parking_lot::Mutex;
use pb_core::Clock;
use pb_store::{NameFilter, Store, StoreError};
use pb_wire::{Request, Response, TokenMasterError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterStartupError {
    #[error("failed to load tokens from the store: {0}")]
    Store(#[from] StoreError),
    #[error("store holds {token_count} active tokens but no blessed version; refusing to serve a half-initialized state")]
    MissingBlessedVersion { token_count: usize },
}

/// Handler implementing the token master logic.
///
/// Tokens live in a prefix-indexed map keyed by name. Exactly one
/// transaction executes at a time, guarded by a process-wide mutex; this
/// is the system's correctness linchpin.
#[derive(Debug)]
pub struct MasterHandler<S: Store, C: Clock> {
    store: Arc<S>,
    clock: C,
    state: Mutex<MasterState>,
}

impl<S: Store, C: Clock> MasterHandler<S, C> {
    /// Load all active tokens into memory. An empty store is bootstrapped
    /// with a fresh blessed version; a non-empty store without one is
    /// refused outright.
    pub fn new(store: Arc<S>, clock: C) -> Result<Self, MasterStartupError> {
        let tokens = store.read_active_tokens(&NameFilter::all())?;
        let mut trie = TokenTrie::new();
        for token in tokens {
            trie.put(token);
        }

        let blessed = match trie.get(BLESSED_VERSION_NAME) {
            Some(token) => BlessedVersion::from_token(token.clone()),
            None => {
                if !trie.is_empty() {
                    return Err(MasterStartupError::MissingBlessedVersion {
                        token_count: trie.len(),
                    });
                }
                let blessed = BlessedVersion::new(&clock);
                store.commit_tokens(&[blessed.token().clone()], &[])?;
                trie.put(blessed.token().clone());
                blessed
            }
        };

        tracing::info!(tokens = trie.len(), version = blessed.current(), "master loaded");
        Ok(Self {
            store,
            clock,
            state: Mutex::new(MasterState { trie, blessed }),
        })
    }

    /// Execute one request as a transaction.
    pub fn process(&self, request: Request) -> Result<Response, TokenMasterError> {
        let kind = request.kind();
        let mut state = self.state.lock();
        let result = state.process(self.store.as_ref(), &self.clock, request);
        if let Err(err) = &result {
            tracing::debug!(request = kind, error = %err, "transaction rejected");
        }
        result
    }

    /// Number of active tokens currently held, blessed version included.
    pub fn token_count(&self) -> usize {
        self.state.lock().trie.len()
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
