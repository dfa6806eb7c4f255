// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traversal of the token hierarchy level-by-level.
//!
//! Group requests count tokens under a prefix, grouped at the next path
//! separator; the group names reveal the name components one level down
//! without transferring the tokens themselves.

use pb_core::{JobState, Name, DELIMITER, WORKFLOW_PREFIX};
use pb_master::{ClientError, MasterClient};
use std::sync::Arc;

const SIGNAL_SEGMENT: &str = "__SIGNAL__";

pub struct Inspector {
    client: Arc<dyn MasterClient>,
}

impl Inspector {
    pub fn new(client: Arc<dyn MasterClient>) -> Self {
        Self { client }
    }

    /// Names of all workflows with active tokens.
    pub async fn workflow_names(&self) -> Result<Vec<String>, ClientError> {
        let counts = self
            .client
            .group(WORKFLOW_PREFIX, Some(DELIMITER))
            .await?;
        let mut names = Vec::new();
        for prefix in counts.keys() {
            if let Some(workflow) = Name::from_workflow_prefix(prefix).workflow {
                if workflow != SIGNAL_SEGMENT {
                    names.push(workflow);
                }
            }
        }
        Ok(names)
    }

    /// Instance ids of a given workflow.
    pub async fn workflow_instances(&self, workflow: &str) -> Result<Vec<String>, ClientError> {
        let prefix = Name::with_workflow(workflow).workflow_prefix();
        let counts = self.client.group(&prefix, Some(DELIMITER)).await?;
        let mut instances = Vec::new();
        for prefix in counts.keys() {
            if let Some(instance) = Name::from_instance_prefix(prefix).instance {
                if instance != SIGNAL_SEGMENT {
                    instances.push(instance);
                }
            }
        }
        Ok(instances)
    }

    /// Job names in a given workflow instance and state.
    pub async fn job_names(
        &self,
        workflow: &str,
        instance: &str,
        state: JobState,
    ) -> Result<Vec<String>, ClientError> {
        let mut name = Name::with_instance(workflow, instance);
        name.job_state = Some(state);
        let counts = self
            .client
            .group(&name.job_state_prefix(), Some(DELIMITER))
            .await?;
        let mut jobs = Vec::new();
        for token_name in counts.keys() {
            if let Some(job) = Name::from_job_token_name(token_name).job {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Event names queued in one input of a job.
    pub async fn event_names(
        &self,
        workflow: &str,
        instance: &str,
        job: &str,
        input: &str,
    ) -> Result<Vec<String>, ClientError> {
        let mut name = Name::with_instance(workflow, instance);
        name.job = Some(job.to_string());
        name.input = Some(input.to_string());
        let counts = self
            .client
            .group(&name.input_prefix(), Some(DELIMITER))
            .await?;
        let mut events = Vec::new();
        for token_name in counts.keys() {
            if let Some(event) = Name::from_event_token_name(token_name).event {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
#[path = "inspector_tests.rs"]
mod tests;
