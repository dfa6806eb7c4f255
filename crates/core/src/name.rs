// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical token names.
//!
//! Token names are `/`-separated paths whose components contain only
//! alphanumerics and underscores:
//!
//! - `/workflow/<wf>/<inst>/job/waiting/<job>` — waiting job token
//! - `/workflow/<wf>/<inst>/job/runnable/<job>` — runnable job token
//! - `/workflow/<wf>/<inst>/input/<job>/<input>/<event>` — event token
//! - `/workflow/[<wf>/[<inst>/]]__SIGNAL__/<action>` — signal token at one
//!   of the three scope levels
//! - `/schedule/workflow/<wf>` — schedule token

use serde::{Deserialize, Serialize};

pub const DELIMITER: &str = "/";
pub const WORKFLOW_PREFIX: &str = "/workflow/";
pub const SCHEDULE_PREFIX: &str = "/schedule/";
pub const WORKFLOW_SCHEDULE_PREFIX: &str = "/schedule/workflow/";

/// Special input defined for jobs with no upstream dependencies.
pub const WORKFLOW_START_INPUT: &str = "__WORKFLOW_START__";

const SIGNAL_SEGMENT: &str = "__SIGNAL__";
const JOB_SEGMENT: &str = "job";
const INPUT_SEGMENT: &str = "input";

/// The two states a job token passes through within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Runnable,
}

crate::simple_display! {
    JobState {
        Waiting => "waiting",
        Runnable => "runnable",
    }
}

impl JobState {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "waiting" => Some(JobState::Waiting),
            "runnable" => Some(JobState::Runnable),
            _ => None,
        }
    }
}

/// Check that a name component contains only alphanumerics and underscores.
pub fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A structured view of a hierarchical token name.
///
/// Constructors render the canonical string form for whichever fields are
/// set; an incomplete combination renders as the empty string. Parsers
/// return `Name::default()` fields for the parts they cannot extract.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Name {
    pub workflow: Option<String>,
    pub instance: Option<String>,
    pub job_state: Option<JobState>,
    pub job: Option<String>,
    pub input: Option<String>,
    pub event: Option<String>,
    pub signal: Option<String>,
}

impl Name {
    pub fn with_workflow(workflow: impl Into<String>) -> Self {
        Name {
            workflow: Some(workflow.into()),
            ..Name::default()
        }
    }

    pub fn with_instance(workflow: impl Into<String>, instance: impl Into<String>) -> Self {
        Name {
            workflow: Some(workflow.into()),
            instance: Some(instance.into()),
            ..Name::default()
        }
    }

    pub fn with_signal(
        workflow: Option<String>,
        instance: Option<String>,
        signal: impl Into<String>,
    ) -> Self {
        Name {
            workflow,
            instance,
            signal: Some(signal.into()),
            ..Name::default()
        }
    }

    // ------------------------------------------------------------------
    // Renderers
    // ------------------------------------------------------------------

    pub fn workflow_prefix(&self) -> String {
        match &self.workflow {
            Some(workflow) => format!("/workflow/{workflow}/"),
            None => String::new(),
        }
    }

    pub fn instance_prefix(&self) -> String {
        match (&self.workflow, &self.instance) {
            (Some(workflow), Some(instance)) => format!("/workflow/{workflow}/{instance}/"),
            _ => String::new(),
        }
    }

    pub fn job_prefix(&self) -> String {
        match (&self.workflow, &self.instance) {
            (Some(workflow), Some(instance)) => format!("/workflow/{workflow}/{instance}/job/"),
            _ => String::new(),
        }
    }

    pub fn job_state_prefix(&self) -> String {
        match (&self.workflow, &self.instance, self.job_state) {
            (Some(workflow), Some(instance), Some(state)) => {
                format!("/workflow/{workflow}/{instance}/job/{state}/")
            }
            _ => String::new(),
        }
    }

    pub fn job_token_name(&self) -> String {
        match (&self.workflow, &self.instance, self.job_state, &self.job) {
            (Some(workflow), Some(instance), Some(state), Some(job)) => {
                format!("/workflow/{workflow}/{instance}/job/{state}/{job}")
            }
            _ => String::new(),
        }
    }

    pub fn input_prefix(&self) -> String {
        match (&self.workflow, &self.instance, &self.job, &self.input) {
            (Some(workflow), Some(instance), Some(job), Some(input)) => {
                format!("/workflow/{workflow}/{instance}/input/{job}/{input}/")
            }
            _ => String::new(),
        }
    }

    pub fn event_token_name(&self) -> String {
        match (
            &self.workflow,
            &self.instance,
            &self.job,
            &self.input,
            &self.event,
        ) {
            (Some(workflow), Some(instance), Some(job), Some(input), Some(event)) => {
                format!("/workflow/{workflow}/{instance}/input/{job}/{input}/{event}")
            }
            _ => String::new(),
        }
    }

    pub fn workflow_schedule_token_name(&self) -> String {
        match &self.workflow {
            Some(workflow) => format!("/schedule/workflow/{workflow}"),
            None => String::new(),
        }
    }

    /// Signal prefix at the scope implied by which fields are set.
    pub fn signal_prefix(&self) -> String {
        match (&self.workflow, &self.instance) {
            (Some(workflow), Some(instance)) => {
                format!("/workflow/{workflow}/{instance}/__SIGNAL__/")
            }
            (Some(workflow), None) => format!("/workflow/{workflow}/__SIGNAL__/"),
            _ => "/workflow/__SIGNAL__/".to_string(),
        }
    }

    pub fn signal_token_name(&self) -> String {
        match &self.signal {
            Some(signal) => format!("{}{signal}", self.signal_prefix()),
            None => String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Parsers
    // ------------------------------------------------------------------

    /// Extract the workflow from a `/workflow/<wf>/...` prefix or name.
    pub fn from_workflow_prefix(prefix: &str) -> Self {
        let mut result = Name::default();
        if let Some(rest) = prefix.strip_prefix(WORKFLOW_PREFIX) {
            if let Some(workflow) = next_component(rest) {
                result.workflow = Some(workflow.to_string());
            }
        }
        result
    }

    /// Extract workflow and instance from a `/workflow/<wf>/<inst>/...` prefix.
    pub fn from_instance_prefix(prefix: &str) -> Self {
        let mut result = Name::from_workflow_prefix(prefix);
        if let Some(rest) = prefix.strip_prefix(WORKFLOW_PREFIX) {
            let mut parts = rest.split(DELIMITER);
            parts.next();
            if let Some(instance) = parts.next().filter(|c| is_valid_component(c)) {
                result.instance = Some(instance.to_string());
            } else {
                result.workflow = None;
            }
        }
        result
    }

    /// Parse a full job token name, `/workflow/<wf>/<inst>/job/<state>/<job>`.
    pub fn from_job_token_name(name: &str) -> Self {
        let mut result = Name::default();
        let Some(rest) = name.strip_prefix(WORKFLOW_PREFIX) else {
            return result;
        };
        let parts: Vec<&str> = rest.split(DELIMITER).collect();
        if parts.len() != 5 || parts[2] != JOB_SEGMENT {
            return result;
        }
        let Some(state) = JobState::from_segment(parts[3]) else {
            return result;
        };
        if [parts[0], parts[1], parts[4]]
            .iter()
            .all(|c| is_valid_component(c))
        {
            result.workflow = Some(parts[0].to_string());
            result.instance = Some(parts[1].to_string());
            result.job_state = Some(state);
            result.job = Some(parts[4].to_string());
        }
        result
    }

    /// Parse a full event token name,
    /// `/workflow/<wf>/<inst>/input/<job>/<input>/<event>`.
    pub fn from_event_token_name(name: &str) -> Self {
        let mut result = Name::default();
        let Some(rest) = name.strip_prefix(WORKFLOW_PREFIX) else {
            return result;
        };
        let parts: Vec<&str> = rest.split(DELIMITER).collect();
        if parts.len() != 6 || parts[2] != INPUT_SEGMENT {
            return result;
        }
        if [parts[0], parts[1], parts[3], parts[4], parts[5]]
            .iter()
            .all(|c| is_valid_component(c))
        {
            result.workflow = Some(parts[0].to_string());
            result.instance = Some(parts[1].to_string());
            result.job = Some(parts[3].to_string());
            result.input = Some(parts[4].to_string());
            result.event = Some(parts[5].to_string());
        }
        result
    }

    /// Parse a signal token name at any of the three scope levels.
    pub fn from_signal_token_name(name: &str) -> Self {
        let mut result = Name::default();
        let Some(rest) = name.strip_prefix(WORKFLOW_PREFIX) else {
            return result;
        };
        let parts: Vec<&str> = rest.split(DELIMITER).collect();
        match parts.as_slice() {
            [SIGNAL_SEGMENT, signal] if is_valid_component(signal) => {
                result.signal = Some(signal.to_string());
            }
            [workflow, SIGNAL_SEGMENT, signal]
                if is_valid_component(workflow) && is_valid_component(signal) =>
            {
                result.workflow = Some(workflow.to_string());
                result.signal = Some(signal.to_string());
            }
            [workflow, instance, SIGNAL_SEGMENT, signal]
                if [workflow, instance, signal].iter().all(|c| is_valid_component(c)) =>
            {
                result.workflow = Some(workflow.to_string());
                result.instance = Some(instance.to_string());
                result.signal = Some(signal.to_string());
            }
            _ => {}
        }
        result
    }

    /// Parse a schedule token name, `/schedule/workflow/<wf>`.
    pub fn from_workflow_schedule_token_name(name: &str) -> Self {
        let mut result = Name::default();
        if let Some(workflow) = name.strip_prefix(WORKFLOW_SCHEDULE_PREFIX) {
            if is_valid_component(workflow) {
                result.workflow = Some(workflow.to_string());
            }
        }
        result
    }
}

fn next_component(rest: &str) -> Option<&str> {
    rest.split(DELIMITER).next().filter(|c| is_valid_component(c))
}

#[cfg(test)]
#[path = "name_tests.rs"]
mod tests;
