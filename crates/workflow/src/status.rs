// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance status derived from job tokens and signals.
//!
//! The scheduler's overrun policies and the operator tools need to know
//! whether an instance is running, failed, succeeded, or was aborted.
//! Status is computed from the store directly so it also works for
//! archived instances.

use pb_core::{
    Name, PayloadError, SchedulePayload, SignalAction, Token, TokenPayload, TIMESTAMP_ATTR,
};
use pb_store::{NameFilter, Store, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Success,
    Failure,
    Aborted,
}

pb_core::simple_display! {
    InstanceStatus {
        Running => "RUNNING",
        Success => "SUCCESS",
        Failure => "FAILURE",
        Aborted => "ABORTED",
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(InstanceStatus::Running),
            "SUCCESS" => Ok(InstanceStatus::Success),
            "FAILURE" => Ok(InstanceStatus::Failure),
            "ABORTED" => Ok(InstanceStatus::Aborted),
            other => Err(format!("unknown instance status {other}")),
        }
    }
}

pub struct StatusReader {
    store: Arc<dyn Store>,
}

impl StatusReader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The workflow's schedule payload, if a schedule token exists.
    pub fn schedule(&self, workflow: &str) -> Result<Option<SchedulePayload>, StatusError> {
        let name = Name::with_workflow(workflow).workflow_schedule_token_name();
        let tokens = self.store.read_active_tokens(&NameFilter::prefix(&name))?;
        match tokens.iter().find(|t| t.name == name) {
            Some(token) => Ok(Some(TokenPayload::schedule(token)?)),
            None => Ok(None),
        }
    }

    /// Emails configured on the workflow's schedule.
    pub fn schedule_emails(&self, workflow: &str) -> Vec<String> {
        match self.schedule(workflow) {
            Ok(Some(schedule)) => schedule.emails,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(workflow, error = %err, "failed to read schedule");
                Vec::new()
            }
        }
    }

    /// All instance ids of a workflow, active and archived.
    pub fn instances(&self, workflow: &str) -> Result<Vec<String>, StatusError> {
        let prefix = Name::with_workflow(workflow).workflow_prefix();
        let mut instances: Vec<String> = Vec::new();
        for name in self.store.read_token_names(&NameFilter::prefix(&prefix))? {
            if let Some(instance) = Name::from_instance_prefix(&name).instance {
                if !instances.contains(&instance) {
                    instances.push(instance);
                }
            }
        }
        Ok(instances)
    }

    /// Status of one instance, or `None` if it has no job tokens at all.
    ///
    /// Archived instances are immutable, so their derived status is
    /// memoized in the store's cached-data relation.
    pub fn instance_status(
        &self,
        workflow: &str,
        instance: &str,
    ) -> Result<Option<InstanceStatus>, StatusError> {
        let prefix = Name::with_instance(workflow, instance).instance_prefix();
        let active = self.store.read_active_tokens(&NameFilter::prefix(&prefix))?;
        if !active.is_empty() {
            return Ok(Some(derive_status(workflow, instance, &active, true)?));
        }

        if let Some(cached) = self.store.get_cached_data(&prefix)? {
            if let Ok(status) = cached.parse() {
                return Ok(Some(status));
            }
        }
        let archived = self
            .store
            .read_archived_tokens(&NameFilter::prefix(&prefix))?;
        if archived.is_empty() {
            return Ok(None);
        }
        let status = derive_status(workflow, instance, &archived, false)?;
        self.store.set_cached_data(&prefix, &status.to_string())?;
        Ok(Some(status))
    }

    /// Drop and rebuild the archived-status cache. Returns the number of
    /// cached entries after the rebuild.
    pub fn rebuild_cache(&self) -> Result<usize, StatusError> {
        self.store.clear_cached_data()?;
        let mut cached = 0;
        for name in self.store.read_archived_token_names(&NameFilter::all())? {
            let parsed = Name::from_instance_prefix(&name);
            if let (Some(workflow), Some(instance)) = (parsed.workflow, parsed.instance) {
                let prefix = Name::with_instance(&workflow, &instance).instance_prefix();
                if self.store.get_cached_data(&prefix)?.is_none()
                    && self.instance_status(&workflow, &instance)?.is_some()
                {
                    cached += 1;
                }
            }
        }
        Ok(cached)
    }

    /// True iff any instance of the workflow is currently running.
    pub fn is_workflow_running(&self, workflow: &str) -> Result<bool, StatusError> {
        for instance in self.instances(workflow)? {
            if self.instance_status(workflow, &instance)? == Some(InstanceStatus::Running) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The most recently started running instance, if any. Instance ids
    /// are millisecond timestamps, so the numeric maximum is the latest.
    pub fn latest_running_instance(
        &self,
        workflow: &str,
    ) -> Result<Option<String>, StatusError> {
        let mut latest: Option<String> = None;
        for instance in self.instances(workflow)? {
            if self.instance_status(workflow, &instance)? != Some(InstanceStatus::Running) {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |current| {
                    instance_ordinal(&instance) > instance_ordinal(current)
                })
            {
                latest = Some(instance);
            }
        }
        Ok(latest)
    }

    /// True iff the latest instance finished in failure (or was aborted).
    pub fn is_workflow_failed(&self, workflow: &str) -> Result<bool, StatusError> {
        let mut latest: Option<(String, InstanceStatus)> = None;
        for instance in self.instances(workflow)? {
            let Some(status) = self.instance_status(workflow, &instance)? else {
                continue;
            };
            if latest
                .as_ref()
                .map_or(true, |(current, _)| {
                    instance_ordinal(&instance) > instance_ordinal(current)
                })
            {
                latest = Some((instance, status));
            }
        }
        Ok(matches!(
            latest,
            Some((_, InstanceStatus::Failure)) | Some((_, InstanceStatus::Aborted))
        ))
    }
}

fn instance_ordinal(instance: &str) -> i64 {
    instance.parse().unwrap_or(0)
}

fn derive_status(
    workflow: &str,
    instance: &str,
    tokens: &[Token],
    is_active: bool,
) -> Result<InstanceStatus, StatusError> {
    let mut any_finished_record = false;
    let mut any_mid_run = false;
    let mut failed = false;

    for token in tokens {
        let name = Name::from_job_token_name(&token.name);
        if name.job_state.is_none() {
            continue;
        }
        let job = TokenPayload::job(token)?;
        if let Some(record) = job.history.last() {
            if record.end_time.is_none() {
                any_mid_run = true;
            } else {
                any_finished_record = true;
                if !job.disabled && record.exit_code.unwrap_or(0) != 0 {
                    failed = true;
                }
            }
        }
    }

    let abort_name = Name::with_signal(
        Some(workflow.to_string()),
        Some(instance.to_string()),
        SignalAction::Abort.to_string(),
    )
    .signal_token_name();
    let aborted = tokens.iter().any(|t| t.name == abort_name);
    if aborted && !is_active {
        return Ok(InstanceStatus::Aborted);
    }

    let archive_name = Name::with_signal(
        Some(workflow.to_string()),
        Some(instance.to_string()),
        SignalAction::Archive.to_string(),
    )
    .signal_token_name();
    let scheduled_for_archive = tokens
        .iter()
        .filter(|t| t.name == archive_name)
        .filter_map(|t| TokenPayload::signal(t).ok())
        .any(|signal| signal.attributes.contains_key(TIMESTAMP_ATTR));

    if !any_finished_record || any_mid_run || (is_active && !scheduled_for_archive) {
        Ok(InstanceStatus::Running)
    } else if failed {
        Ok(InstanceStatus::Failure)
    } else {
        Ok(InstanceStatus::Success)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
