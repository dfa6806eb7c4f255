// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow parsers and their registry.
//!
//! A parser turns a workflow definition into seed tokens: one waiting job
//! token per job plus a start event for every dependency-free job. Parsers
//! register under the identifier named by the configuration's `parser`
//! field; schedulers and operator tools resolve them through the registry.

use parking_lot::RwLock;
use pb_core::{
    unique_name, EventPayload, JobPayload, JobState, Name, PayloadError, PinballConfig,
    SchedulePayload, Token, WORKFLOW_START_INPUT,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A source of workflow definitions.
pub trait WorkflowParser: Send + Sync {
    /// Names of all workflows this parser can produce.
    fn workflow_names(&self) -> Vec<String>;

    /// Seed tokens of a fresh instance of the workflow: waiting job tokens
    /// plus start events.
    fn workflow_tokens(&self, workflow: &str, instance: &str)
        -> Result<Vec<Token>, PayloadError>;

    /// The schedule token of the workflow, if it defines a schedule.
    fn schedule_token(&self, workflow: &str) -> Result<Option<Token>, PayloadError>;
}

static REGISTRY: RwLock<BTreeMap<String, Arc<dyn WorkflowParser>>> = RwLock::new(BTreeMap::new());

/// Register a parser under an identifier at startup.
pub fn register_parser(identifier: &str, parser: Arc<dyn WorkflowParser>) {
    REGISTRY.write().insert(identifier.to_string(), parser);
}

/// Resolve the parser named by the configuration.
pub fn parser_for(config: &PinballConfig) -> Option<Arc<dyn WorkflowParser>> {
    REGISTRY.read().get(&config.parser).cloned()
}

// ---------------------------------------------------------------------------
// Static parser
// ---------------------------------------------------------------------------

/// A parser over declarative in-process workflow definitions. Used by the
/// demo configuration and tests; real deployments register their own.
#[derive(Default)]
pub struct StaticParser {
    workflows: RwLock<BTreeMap<String, StaticWorkflow>>,
}

struct StaticWorkflow {
    jobs: Vec<JobPayload>,
    schedule: Option<SchedulePayload>,
}

impl StaticParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) a workflow.
    pub fn define_workflow(
        &self,
        workflow: &str,
        jobs: Vec<JobPayload>,
        schedule: Option<SchedulePayload>,
    ) {
        self.workflows.write().insert(
            workflow.to_string(),
            StaticWorkflow { jobs, schedule },
        );
    }
}

impl WorkflowParser for StaticParser {
    fn workflow_names(&self) -> Vec<String> {
        self.workflows.read().keys().cloned().collect()
    }

    fn workflow_tokens(
        &self,
        workflow: &str,
        instance: &str,
    ) -> Result<Vec<Token>, PayloadError> {
        let workflows = self.workflows.read();
        let Some(definition) = workflows.get(workflow) else {
            return Ok(Vec::new());
        };
        let mut tokens = Vec::new();
        for job in &definition.jobs {
            let mut name = Name::with_instance(workflow, instance);
            name.job_state = Some(JobState::Waiting);
            name.job = Some(job.name.clone());
            tokens.push(Token::with_data(name.job_token_name(), job.encode()?));

            if job.inputs.iter().any(|i| i == WORKFLOW_START_INPUT) {
                let mut event_name = Name::with_instance(workflow, instance);
                event_name.job = Some(job.name.clone());
                event_name.input = Some(WORKFLOW_START_INPUT.to_string());
                event_name.event = Some(unique_name("event"));
                tokens.push(Token::with_data(
                    event_name.event_token_name(),
                    EventPayload::new("parser").encode()?,
                ));
            }
        }
        Ok(tokens)
    }

    fn schedule_token(&self, workflow: &str) -> Result<Option<Token>, PayloadError> {
        let workflows = self.workflows.read();
        let Some(schedule) = workflows.get(workflow).and_then(|w| w.schedule.as_ref()) else {
            return Ok(None);
        };
        let name = Name::with_workflow(workflow).workflow_schedule_token_name();
        Ok(Some(Token::with_data(name, schedule.encode()?)))
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
