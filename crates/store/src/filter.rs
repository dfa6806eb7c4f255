// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Name filters compiled to indexable `LIKE` conditions.

/// Prefix/infix/suffix name match, combined with AND.
///
/// All three positions treat `_` literally — token names are full of
/// underscores, and SQL's single-character wildcard would otherwise turn
/// every filter into a scan of unrelated rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pub prefix: String,
    pub infix: String,
    pub suffix: String,
}

impl NameFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty() && self.infix.is_empty() && self.suffix.is_empty()
    }

    /// Render the `WHERE` clause (or an empty string) plus bound parameters.
    /// `LIKE` with an escaped literal pattern keeps the name index usable.
    pub(crate) fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if !self.prefix.is_empty() {
            conditions.push("name LIKE ? ESCAPE '\\'");
            params.push(format!("{}%", escape_like(&self.prefix)));
        }
        if !self.infix.is_empty() {
            conditions.push("name LIKE ? ESCAPE '\\'");
            params.push(format!("%{}%", escape_like(&self.infix)));
        }
        if !self.suffix.is_empty() {
            conditions.push("name LIKE ? ESCAPE '\\'");
            params.push(format!("%{}", escape_like(&self.suffix)));
        }
        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
