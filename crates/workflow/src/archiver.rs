// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relocation of finished instances to the archived table.

use pb_core::{Name, SignalAction, Token};
use pb_master::{ClientError, MasterClient};
use std::sync::Arc;

/// Clocks on different machines can be off by this much; a token whose
/// lease lapsed less than this long ago is still treated as owned.
pub const CLOCK_SKEW_THRESHOLD_SEC: i64 = 10;

pub struct Archiver {
    client: Arc<dyn MasterClient>,
    workflow: String,
    instance: String,
}

impl Archiver {
    pub fn new(client: Arc<dyn MasterClient>, workflow: &str, instance: &str) -> Self {
        Self {
            client,
            workflow: workflow.to_string(),
            instance: instance.to_string(),
        }
    }

    /// Archive the instance once its archive deadline has passed.
    /// Returns true iff the instance was archived by this call.
    pub async fn archive_if_expired(
        &self,
        expiration_timestamp: i64,
        now_secs: i64,
    ) -> Result<bool, ClientError> {
        if expiration_timestamp > now_secs {
            return Ok(false);
        }
        let tokens = self.instance_tokens().await?;
        if tokens.is_empty() {
            return Ok(false);
        }
        self.archive_tokens(tokens).await
    }

    /// Archive the instance if it carries an ABORT signal and no token
    /// still appears owned. Ownership is judged conservatively: a lease
    /// that lapsed within the clock-skew window still counts.
    pub async fn archive_if_aborted(&self, now_secs: i64) -> Result<bool, ClientError> {
        let tokens = self.instance_tokens().await?;
        if tokens.is_empty()
            || !self.has_abort_token(&tokens)
            || tokens.iter().any(|t| appears_owned(t, now_secs))
        {
            return Ok(false);
        }
        self.archive_tokens(tokens).await
    }

    async fn instance_tokens(&self) -> Result<Vec<Token>, ClientError> {
        let prefix = Name::with_instance(&self.workflow, &self.instance).instance_prefix();
        self.client.query_prefix(&prefix).await
    }

    async fn archive_tokens(&self, tokens: Vec<Token>) -> Result<bool, ClientError> {
        match self.client.archive(tokens).await {
            Ok(()) => {
                tracing::info!(
                    workflow = self.workflow,
                    instance = self.instance,
                    "instance archived"
                );
                Ok(true)
            }
            Err(err) if err.code().is_some() => {
                // A concurrent mutation got in first; the same or another
                // worker will archive on a later pass.
                tracing::debug!(
                    workflow = self.workflow,
                    instance = self.instance,
                    error = %err,
                    "archive attempt lost a race"
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn has_abort_token(&self, tokens: &[Token]) -> bool {
        let abort_name = Name::with_signal(
            Some(self.workflow.clone()),
            Some(self.instance.clone()),
            SignalAction::Abort.to_string(),
        )
        .signal_token_name();
        tokens.iter().any(|t| t.name == abort_name)
    }
}

fn appears_owned(token: &Token, now_secs: i64) -> bool {
    match token.expiration_time {
        Some(expiration) => now_secs - expiration < CLOCK_SKEW_THRESHOLD_SEC,
        None => false,
    }
}

#[cfg(test)]
#[path = "archiver_tests.rs"]
mod tests;
