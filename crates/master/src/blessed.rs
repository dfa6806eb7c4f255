// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The blessed version, a singleton token generating unique versions.
//!
//! Versions of tokens stored in a given master are required to be unique
//! and totally ordered. Each allocation takes the maximum of the stored
//! counter plus one and the current wall clock in milliseconds, so a
//! version also tells roughly when a token was last modified.

use pb_core::{Clock, Token, EXPIRATION_NEVER};

/// Name of the singleton version-counter token.
pub const BLESSED_VERSION_NAME: &str = "/__BLESSED_VERSION__";

/// Owner recorded on master-internal tokens.
pub const MASTER_OWNER: &str = "__master__";

#[derive(Debug, Clone)]
pub struct BlessedVersion {
    token: Token,
}

impl BlessedVersion {
    /// Create a fresh counter, used when bootstrapping an empty store.
    pub fn new(clock: &impl Clock) -> Self {
        let now_ms = clock.epoch_ms();
        let mut token = Token::new(BLESSED_VERSION_NAME);
        token.version = now_ms as i64;
        token.owner = Some(MASTER_OWNER.to_string());
        token.expiration_time = Some(EXPIRATION_NEVER);
        token.data = Some(format!("blessed version created at {now_ms}"));
        Self { token }
    }

    /// Adopt the counter reloaded from the store.
    pub fn from_token(token: Token) -> Self {
        Self { token }
    }

    /// Allocate the next version. Callers must persist the updated token in
    /// the same commit as the mutation that consumed the version.
    pub fn advance(&mut self, clock: &impl Clock) -> i64 {
        self.token.version = (self.token.version + 1).max(clock.epoch_ms() as i64);
        self.token.version
    }

    pub fn current(&self) -> i64 {
        self.token.version
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::FakeClock;

    #[test]
    fn advance_is_strictly_increasing_past_the_clock() {
        let clock = FakeClock::new();
        clock.set_epoch_ms(5_000);
        let mut blessed = BlessedVersion::new(&clock);
        assert_eq!(blessed.current(), 5_000);

        // Clock stands still: counter increments.
        assert_eq!(blessed.advance(&clock), 5_001);
        assert_eq!(blessed.advance(&clock), 5_002);

        // Clock jumps ahead: counter snaps to wall time.
        clock.set_epoch_ms(9_000);
        assert_eq!(blessed.advance(&clock), 9_000);
        assert_eq!(blessed.advance(&clock), 9_001);
    }

    #[test]
    fn fresh_counter_is_owned_forever() {
        let clock = FakeClock::new();
        let blessed = BlessedVersion::new(&clock);
        let token = blessed.token();
        assert_eq!(token.name, BLESSED_VERSION_NAME);
        assert_eq!(token.owner.as_deref(), Some(MASTER_OWNER));
        assert!(token.is_owned(i64::MAX - 1));
    }

    #[test]
    fn reloaded_counter_resumes_from_stored_version() {
        let clock = FakeClock::new();
        clock.set_epoch_ms(1_000);
        let mut stored = Token::new(BLESSED_VERSION_NAME);
        stored.version = 42_000;
        let mut blessed = BlessedVersion::from_token(stored);
        assert_eq!(blessed.advance(&clock), 42_001);
    }
}
