// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manipulation of a workflow instance's job and event graph.
//!
//! The analyzer loads job tokens (and, from a live master, event tokens)
//! of one instance, then supports poisoning a subset of the DAG, moving
//! the tokens to a new instance id, and clearing execution histories. It
//! backs the retry, redo, and poison operator commands; archived
//! instances are immutable, so the loaded graph cannot change underneath
//! it.

use crate::parser::WorkflowParser;
use pb_core::{
    EventPayload, JobPayload, JobState, Name, PayloadError, Token, TokenPayload,
};
use pb_master::{ClientError, MasterClient};
use pb_store::{NameFilter, Store, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("job {0} is not part of the workflow")]
    UnknownJob(String),
}

pub struct Analyzer {
    workflow: String,
    instance: Option<String>,
    jobs: BTreeMap<String, JobPayload>,
    job_priorities: BTreeMap<String, f64>,
    existing_events: BTreeSet<String>,
    new_events: BTreeMap<String, EventPayload>,
    /// After a poison, only these jobs are exported.
    poisoned: Option<BTreeSet<String>>,
}

impl Analyzer {
    fn new(workflow: &str, instance: Option<&str>) -> Self {
        Self {
            workflow: workflow.to_string(),
            instance: instance.map(str::to_string),
            jobs: BTreeMap::new(),
            job_priorities: BTreeMap::new(),
            existing_events: BTreeSet::new(),
            new_events: BTreeMap::new(),
            poisoned: None,
        }
    }

    /// Load an archived instance from the store.
    pub fn from_store(
        store: &dyn Store,
        workflow: &str,
        instance: &str,
    ) -> Result<Self, AnalyzerError> {
        let mut analyzer = Self::new(workflow, Some(instance));
        let prefix = Name::with_instance(workflow, instance).instance_prefix();
        let tokens = store.read_archived_tokens(&NameFilter::prefix(&prefix))?;
        analyzer.absorb_tokens(&tokens)?;
        Ok(analyzer)
    }

    /// Load an instance (job and event tokens) from a live master.
    pub async fn from_client(
        client: &Arc<dyn MasterClient>,
        workflow: &str,
        instance: &str,
    ) -> Result<Self, AnalyzerError> {
        let mut analyzer = Self::new(workflow, Some(instance));
        let prefix = Name::with_instance(workflow, instance).instance_prefix();
        let tokens = client.query_prefix(&prefix).await?;
        analyzer.absorb_tokens(&tokens)?;
        Ok(analyzer)
    }

    /// Build the pristine workflow graph from a parser.
    pub fn from_parser(
        parser: &dyn WorkflowParser,
        workflow: &str,
        instance: &str,
    ) -> Result<Self, AnalyzerError> {
        let mut analyzer = Self::new(workflow, Some(instance));
        let tokens = parser.workflow_tokens(workflow, instance)?;
        analyzer.absorb_tokens(&tokens)?;
        Ok(analyzer)
    }

    fn absorb_tokens(&mut self, tokens: &[Token]) -> Result<(), AnalyzerError> {
        for token in tokens {
            let name = Name::from_job_token_name(&token.name);
            if name.job.is_some() {
                let job = TokenPayload::job(token)?;
                self.job_priorities.insert(job.name.clone(), token.priority);
                self.jobs.insert(job.name.clone(), job);
                continue;
            }
            let name = Name::from_event_token_name(&token.name);
            if name.event.is_some() {
                self.existing_events.insert(token.name.clone());
            }
        }
        Ok(())
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn job(&self, name: &str) -> Option<&JobPayload> {
        self.jobs.get(name)
    }

    /// Poison the instance at the given root jobs: only descendants of the
    /// roots will run, and events are synthesized for every dependency of
    /// a descendant that is external to the descendant set. Subsequent
    /// exports are restricted to the descendant set.
    pub fn poison(&mut self, roots: &[String]) -> Result<(), AnalyzerError> {
        let mut descendants: BTreeSet<String> = BTreeSet::new();
        for root in roots {
            self.collect_descendants(root, &mut descendants)?;
        }
        self.generate_missing_events(&descendants);
        self.poisoned = Some(descendants);
        Ok(())
    }

    fn collect_descendants(
        &self,
        root: &str,
        visited: &mut BTreeSet<String>,
    ) -> Result<(), AnalyzerError> {
        if visited.contains(root) {
            return Ok(());
        }
        let job = self
            .jobs
            .get(root)
            .ok_or_else(|| AnalyzerError::UnknownJob(root.to_string()))?;
        visited.insert(root.to_string());
        for child in job.outputs.clone() {
            self.collect_descendants(&child, visited)?;
        }
        Ok(())
    }

    /// For the chosen job set, produce events satisfying upstream
    /// dependencies external to that set. One event per distinct input
    /// slot; inputs already holding an event are left alone.
    fn generate_missing_events(&mut self, job_names: &BTreeSet<String>) {
        let Some(instance) = self.instance.clone() else {
            return;
        };
        let mut input_prefixes: BTreeSet<String> = BTreeSet::new();
        for job_name in job_names {
            let Some(job) = self.jobs.get(job_name) else {
                continue;
            };
            for input in &job.inputs {
                if job_names.contains(input) {
                    continue;
                }
                let mut name = Name::with_instance(&self.workflow, &instance);
                name.job = Some(job_name.clone());
                name.input = Some(input.clone());
                name.event = Some(format!("poison_{}", input_prefixes.len()));
                let input_prefix = name.input_prefix();
                if !input_prefixes.insert(input_prefix.clone()) {
                    continue;
                }
                // An event already queued in this input satisfies the
                // dependency; do not synthesize another.
                let satisfied = self
                    .existing_events
                    .iter()
                    .any(|existing| existing.starts_with(&input_prefix));
                if !satisfied {
                    self.new_events
                        .insert(name.event_token_name(), EventPayload::new("analyzer"));
                }
            }
        }
    }

    /// Move all tokens to a new instance id.
    pub fn change_instance(&mut self, instance: &str) {
        let mut moved = BTreeMap::new();
        for (event_name, event) in std::mem::take(&mut self.new_events) {
            let mut name = Name::from_event_token_name(&event_name);
            name.instance = Some(instance.to_string());
            moved.insert(name.event_token_name(), event);
        }
        self.new_events = moved;
        self.instance = Some(instance.to_string());
    }

    /// Remove execution histories from all jobs.
    pub fn clear_job_histories(&mut self) {
        for job in self.jobs.values_mut() {
            job.history.clear();
            job.events.clear();
        }
    }

    /// Export every stored token: a waiting job token per job plus the
    /// synthesized events.
    pub fn tokens(&self) -> Result<Vec<Token>, AnalyzerError> {
        let Some(instance) = &self.instance else {
            return Ok(Vec::new());
        };
        let mut result = Vec::new();
        for job in self.jobs.values() {
            if self
                .poisoned
                .as_ref()
                .is_some_and(|poisoned| !poisoned.contains(&job.name))
            {
                continue;
            }
            let mut name = Name::with_instance(&self.workflow, instance);
            name.job_state = Some(JobState::Waiting);
            name.job = Some(job.name.clone());
            let mut token = Token::with_data(name.job_token_name(), job.encode()?);
            token.priority = self
                .job_priorities
                .get(&job.name)
                .copied()
                .unwrap_or_default();
            result.push(token);
        }
        result.extend(self.new_event_tokens()?);
        Ok(result)
    }

    /// Export only the synthesized event tokens.
    pub fn new_event_tokens(&self) -> Result<Vec<Token>, AnalyzerError> {
        let mut result = Vec::new();
        for (event_name, event) in &self.new_events {
            result.push(Token::with_data(event_name.clone(), event.encode()?));
        }
        Ok(result)
    }
}

#[cfg(test)]
#[path = "analyzer_tests.rs"]
mod tests;
