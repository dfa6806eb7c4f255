// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read/write access over signal tokens.
//!
//! Signal tokens may be placed at three levels of the workflow hierarchy:
//! the top level, the workflow level, and the instance level. Location
//! defines scope: a DRAIN token at `/workflow/__SIGNAL__/` drains every
//! workflow, one at `/workflow/<wf>/__SIGNAL__/` drains instances of that
//! workflow, and one at the instance level drains only that instance.

use pb_core::{
    Name, SignalAction, SignalPayload, Token, TokenPayload, GENERATION_ATTR, TIMESTAMP_ATTR,
};
use pb_master::{ClientError, MasterClient};
use pb_wire::Query;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Signaller {
    client: Arc<dyn MasterClient>,
    workflow: Option<String>,
    instance: Option<String>,
    /// Generation of the consulting process; gates EXIT signals.
    generation: u64,
    /// Cached signals by action, deduped across scope levels.
    signals: BTreeMap<SignalAction, SignalPayload>,
}

impl Signaller {
    /// Create a signaller scoped to an instance, a workflow, or globally,
    /// loading the currently set signals.
    pub async fn new(
        client: Arc<dyn MasterClient>,
        workflow: Option<&str>,
        instance: Option<&str>,
        generation: u64,
    ) -> Result<Self, ClientError> {
        let mut signaller = Self {
            client,
            workflow: workflow.map(str::to_string),
            instance: instance.map(str::to_string),
            generation,
            signals: BTreeMap::new(),
        };
        signaller.refresh().await?;
        Ok(signaller)
    }

    /// Reload signals from the master: one query per visible scope level.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let mut queries = vec![Query::prefix(Name::default().signal_prefix())];
        if let Some(workflow) = &self.workflow {
            queries.push(Query::prefix(Name::with_workflow(workflow).signal_prefix()));
            if let Some(instance) = &self.instance {
                queries.push(Query::prefix(
                    Name::with_instance(workflow, instance).signal_prefix(),
                ));
            }
        }
        let results = self.client.query(queries).await?;

        // The same action may be signalled at several levels; keep one
        // arbitrarily, as they are equivalent for scope resolution.
        self.signals.clear();
        for token in results.into_iter().flatten() {
            match TokenPayload::signal(&token) {
                Ok(signal) => {
                    self.signals.insert(signal.action, signal);
                }
                Err(err) => {
                    tracing::warn!(token = %token.name, error = %err, "skipping malformed signal")
                }
            }
        }
        Ok(())
    }

    /// Check if a signal for the action exists, at any visible scope.
    /// Consults the local cache only.
    pub fn is_signal_present(&self, action: SignalAction) -> bool {
        self.signals.contains_key(&action)
    }

    /// Check if the action is set *and relevant* for this process. An EXIT
    /// signal only applies when its recorded generation exceeds ours, so a
    /// rolling restart stops only older worker cohorts.
    pub fn is_action_set(&self, action: SignalAction) -> bool {
        let Some(signal) = self.signals.get(&action) else {
            return false;
        };
        if action == SignalAction::Exit {
            if let Some(generation) = signal.attribute_i64(GENERATION_ATTR) {
                if generation <= self.generation as i64 {
                    return false;
                }
            }
        }
        true
    }

    pub fn get_attribute(&self, action: SignalAction, key: &str) -> Option<String> {
        self.signals.get(&action)?.attributes.get(key).cloned()
    }

    /// Post a signal for the action. Idempotent: an existing token with the
    /// same attributes is left alone. A concurrent writer racing us is not
    /// an error; the cache is refreshed instead.
    pub async fn set_action(
        &mut self,
        action: SignalAction,
        now_secs: i64,
    ) -> Result<(), ClientError> {
        let mut attributes = BTreeMap::new();
        match action {
            SignalAction::Abort => {
                attributes.insert(TIMESTAMP_ATTR.to_string(), now_secs.to_string());
            }
            SignalAction::Exit => {
                attributes.insert(GENERATION_ATTR.to_string(), self.generation.to_string());
            }
            _ => {}
        }
        if let Some(existing) = self.signals.get(&action) {
            if existing.attributes == attributes {
                return Ok(());
            }
        }

        // A token with the same action but different data may already exist.
        let mut token = match self.signal_token(action).await? {
            Some(token) => token,
            None => Token::new(self.scoped_name(action).signal_token_name()),
        };
        let signal = SignalPayload {
            action,
            attributes,
        };
        token.data = Some(encode_signal(&signal)?);
        match self.client.modify(vec![token], vec![]).await {
            Ok(_) => {
                self.signals.insert(action, signal);
                Ok(())
            }
            Err(err) if err.code().is_some() => {
                // Someone concurrently posted the same signal.
                self.refresh().await
            }
            Err(err) => Err(err),
        }
    }

    /// Remove the signal for the action at this scope.
    pub async fn remove_action(&mut self, action: SignalAction) -> Result<(), ClientError> {
        if !self.is_signal_present(action) {
            return Ok(());
        }
        if let Some(token) = self.signal_token(action).await? {
            match self.client.modify(vec![], vec![token]).await {
                Ok(_) => {}
                Err(err) if err.code().is_some() => {
                    self.refresh().await?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        self.signals.remove(&action);
        Ok(())
    }

    /// Compare-and-set an attribute: set it unless it is already present.
    /// Returns true iff this call set the value. Returns false when the
    /// signal is not set at all.
    pub async fn set_attribute_if_missing(
        &mut self,
        action: SignalAction,
        key: &str,
        value: &str,
    ) -> Result<bool, ClientError> {
        if self.get_attribute(action, key).is_some() {
            return Ok(false);
        }
        let Some(mut token) = self.signal_token(action).await? else {
            return Ok(false);
        };
        let mut signal = match TokenPayload::signal(&token) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(token = %token.name, error = %err, "malformed signal payload");
                return Ok(false);
            }
        };
        // Re-check against the fresh copy: another process may have set the
        // attribute since our cache was loaded.
        if signal.attributes.contains_key(key) {
            self.signals.insert(action, signal);
            return Ok(false);
        }
        signal.attributes.insert(key.to_string(), value.to_string());
        token.data = Some(encode_signal(&signal)?);
        match self.client.modify(vec![token], vec![]).await {
            Ok(_) => {
                self.signals.insert(action, signal);
                Ok(true)
            }
            Err(err) if err.code().is_some() => {
                self.refresh().await?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn scoped_name(&self, action: SignalAction) -> Name {
        Name::with_signal(
            self.workflow.clone(),
            self.instance.clone(),
            action.to_string(),
        )
    }

    /// Fetch the signal token for the action at this exact scope.
    async fn signal_token(&self, action: SignalAction) -> Result<Option<Token>, ClientError> {
        let name = self.scoped_name(action).signal_token_name();
        let tokens = self.client.query_prefix(&name).await?;
        Ok(tokens.into_iter().next())
    }
}

fn encode_signal(signal: &SignalPayload) -> Result<String, ClientError> {
    signal.encode().map_err(|err| {
        ClientError::Master(pb_wire::TokenMasterError::input_error(format!(
            "signal payload failed to serialize: {err}"
        )))
    })
}

#[cfg(test)]
#[path = "signaller_tests.rs"]
mod tests;
