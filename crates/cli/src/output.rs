// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output formatting and interactive confirmation.

use chrono::{TimeZone, Utc};
use pb_core::Token;
use std::io::Write;

/// Render a token the way operators read them: one line, timestamps
/// humanized.
pub fn token_to_str(token: &Token) -> String {
    format!(
        "Token(version={}, owner={}, expirationTime={}, priority={}, name={}, data={})",
        token.version,
        token.owner.as_deref().unwrap_or("None"),
        token
            .expiration_time
            .map(format_timestamp)
            .unwrap_or_else(|| "None".to_string()),
        token.priority,
        token.name,
        token.data.as_deref().unwrap_or("None"),
    )
}

fn format_timestamp(timestamp: i64) -> String {
    if timestamp == pb_core::EXPIRATION_NEVER {
        return "never".to_string();
    }
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => timestamp.to_string(),
    }
}

/// Ask the operator to confirm a destructive action.
pub fn confirm(message: &str) -> bool {
    print!("{message}? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_line_includes_every_field() {
        let mut token = Token::with_data("/a/b", "payload");
        token.version = 9;
        token.owner = Some("worker_1".to_string());
        token.expiration_time = Some(pb_core::EXPIRATION_NEVER);
        let line = token_to_str(&token);
        assert!(line.contains("version=9"));
        assert!(line.contains("owner=worker_1"));
        assert!(line.contains("expirationTime=never"));
        assert!(line.contains("name=/a/b"));
        assert!(line.contains("data=payload"));
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
