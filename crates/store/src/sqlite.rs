// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed token store.
//!
//! Table names are suffixed with the master name so several masters can
//! share one database file.

use crate::filter::NameFilter;
use crate::{Store, StoreError};
use parking_lot::Mutex;
use pb_core::{name::is_valid_component, Token};
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    active_table: String,
    archived_table: String,
    cached_table: String,
}

impl SqliteStore {
    /// Open (and initialize if needed) the store backing a named master.
    pub fn open(path: &Path, master_name: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, master_name)
    }

    /// In-memory store, used by tests and throwaway tooling.
    pub fn in_memory(master_name: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, master_name)
    }

    fn with_connection(conn: Connection, master_name: &str) -> Result<Self, StoreError> {
        if !is_valid_component(master_name) {
            return Err(StoreError::InvalidMasterName(master_name.to_string()));
        }
        let store = Self {
            conn: Mutex::new(conn),
            active_table: format!("active_tokens_{master_name}"),
            archived_table: format!("archived_tokens_{master_name}"),
            cached_table: format!("cached_data_{master_name}"),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "journal_mode", "wal")?;
        for table in [&self.active_table, &self.archived_table] {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                         name TEXT PRIMARY KEY,
                         version INTEGER NOT NULL,
                         owner TEXT,
                         expiration_time INTEGER,
                         priority REAL NOT NULL DEFAULT 0,
                         data TEXT
                     )"
                ),
                [],
            )?;
        }
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                     name TEXT PRIMARY KEY,
                     data TEXT NOT NULL
                 )",
                self.cached_table
            ),
            [],
        )?;
        Ok(())
    }

    fn read_rows(&self, table: &str, filter: &NameFilter) -> Result<Vec<Token>, StoreError> {
        let (clause, values) = filter.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT name, version, owner, expiration_time, priority, data FROM {table}{clause}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(Token {
                name: row.get(0)?,
                version: row.get(1)?,
                owner: row.get(2)?,
                expiration_time: row.get(3)?,
                priority: row.get(4)?,
                data: row.get(5)?,
            })
        })?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    fn read_names(&self, table: &str, filter: &NameFilter) -> Result<Vec<String>, StoreError> {
        let (clause, values) = filter.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT name FROM {table}{clause}"))?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

fn upsert(tx: &rusqlite::Transaction<'_>, table: &str, token: &Token) -> Result<(), StoreError> {
    tx.execute(
        &format!(
            "INSERT INTO {table} (name, version, owner, expiration_time, priority, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 version = excluded.version,
                 owner = excluded.owner,
                 expiration_time = excluded.expiration_time,
                 priority = excluded.priority,
                 data = excluded.data"
        ),
        params![
            token.name,
            token.version,
            token.owner,
            token.expiration_time,
            token.priority,
            token.data,
        ],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn commit_tokens(&self, updates: &[Token], deletes: &[Token]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for token in updates {
            upsert(&tx, &self.active_table, token)?;
        }
        for token in deletes {
            tx.execute(
                &format!("DELETE FROM {} WHERE name = ?1", self.active_table),
                params![token.name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn archive_tokens(&self, tokens: &[Token]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for token in tokens {
            tx.execute(
                &format!("DELETE FROM {} WHERE name = ?1", self.active_table),
                params![token.name],
            )?;
            upsert(&tx, &self.archived_table, token)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_archived_tokens(&self, deletes: &[Token]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for token in deletes {
            tx.execute(
                &format!("DELETE FROM {} WHERE name = ?1", self.archived_table),
                params![token.name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_active_tokens(&self, filter: &NameFilter) -> Result<Vec<Token>, StoreError> {
        self.read_rows(&self.active_table, filter)
    }

    fn read_archived_tokens(&self, filter: &NameFilter) -> Result<Vec<Token>, StoreError> {
        self.read_rows(&self.archived_table, filter)
    }

    fn read_active_token_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError> {
        self.read_names(&self.active_table, filter)
    }

    fn read_archived_token_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError> {
        self.read_names(&self.archived_table, filter)
    }

    fn get_cached_data(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT data FROM {} WHERE name = ?1",
            self.cached_table
        ))?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set_cached_data(&self, name: &str, data: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {} (name, data) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET data = excluded.data",
                self.cached_table
            ),
            params![name, data],
        )?;
        Ok(())
    }

    fn read_cached_data_names(&self, filter: &NameFilter) -> Result<Vec<String>, StoreError> {
        self.read_names(&self.cached_table, filter)
    }

    fn clear_cached_data(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", self.cached_table), [])?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
