// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory prefix-indexed token map.
//!
//! Backed by an ordered map; prefix operations run a range scan starting at
//! the prefix, so their cost is proportional to the number of matches, not
//! the size of the map.

use pb_core::Token;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct TokenTrie {
    tokens: BTreeMap<String, Token>,
}

impl TokenTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Token> {
        self.tokens.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tokens.contains_key(name)
    }

    pub fn put(&mut self, token: Token) {
        self.tokens.insert(token.name.clone(), token);
    }

    pub fn delete(&mut self, name: &str) -> Option<Token> {
        self.tokens.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// All tokens whose names start with `prefix`.
    pub fn values_under(&self, prefix: &str) -> Vec<Token> {
        self.range_under(prefix).map(|(_, t)| t.clone()).collect()
    }

    /// All names starting with `prefix`.
    pub fn names_under(&self, prefix: &str) -> Vec<String> {
        self.range_under(prefix).map(|(n, _)| n.clone()).collect()
    }

    fn range_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Token)> {
        self.tokens
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
    }

    /// Iterate over every token in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }
}

#[cfg(test)]
#[path = "trie_tests.rs"]
mod tests;
