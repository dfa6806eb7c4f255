// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for this crate's tests: an in-process master with a
//! fake clock, plus token builders for seeding workflows.

use crate::emailer::{Emailer, RecordingMailer};
use crate::worker::{Worker, WorkerConfig};
use pb_core::{
    EventPayload, FakeClock, JobPayload, JobState, Name, Token, WORKFLOW_START_INPUT,
};
use pb_master::{LocalClient, MasterClient, MasterHandler};
use pb_store::SqliteStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub clock: FakeClock,
    pub client: Arc<dyn MasterClient>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn harness() -> Harness {
    let store = Arc::new(SqliteStore::in_memory("workflow_test").unwrap());
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000_000);
    let handler = Arc::new(MasterHandler::new(Arc::clone(&store), clock.clone()).unwrap());
    Harness {
        store,
        clock,
        client: Arc::new(LocalClient::new(handler)),
        mailer: Arc::new(RecordingMailer::default()),
    }
}

impl Harness {
    /// A worker wired to this harness with test-friendly delays.
    pub fn worker(&self, logs_dir: &Path) -> Worker<FakeClock> {
        let config = WorkerConfig {
            name: "worker_test".to_string(),
            generation: 0,
            poll_time: Duration::from_millis(50),
            inter_query_delay: Duration::from_millis(0),
            lease_time_sec: 20 * 60,
            logs_dir: logs_dir.to_path_buf(),
            archive_delay_sec: 0,
        };
        Worker::new(
            Arc::clone(&self.client),
            self.store.clone(),
            self.clock.clone(),
            Arc::new(Emailer::new(self.mailer.clone())),
            config,
        )
    }

    pub async fn seed(&self, tokens: Vec<Token>) -> Vec<Token> {
        self.client.modify(tokens, vec![]).await.unwrap()
    }

    pub async fn active_names(&self, prefix: &str) -> Vec<String> {
        self.client
            .query_prefix(prefix)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect()
    }
}

pub fn waiting_job_token(workflow: &str, instance: &str, job: &JobPayload) -> Token {
    let mut name = Name::with_instance(workflow, instance);
    name.job_state = Some(JobState::Waiting);
    name.job = Some(job.name.clone());
    Token::with_data(name.job_token_name(), job.encode().unwrap())
}

pub fn event_token(workflow: &str, instance: &str, job: &str, input: &str, event: &str) -> Token {
    let mut name = Name::with_instance(workflow, instance);
    name.job = Some(job.to_string());
    name.input = Some(input.to_string());
    name.event = Some(event.to_string());
    Token::with_data(
        name.event_token_name(),
        EventPayload::new("parser").encode().unwrap(),
    )
}

/// A start-input job running a shell command.
pub fn shell_job(name: &str, command: &str) -> JobPayload {
    JobPayload::new(name, command)
}

/// A job consuming the outputs of the given upstream jobs.
pub fn downstream_job(name: &str, command: &str, inputs: &[&str]) -> JobPayload {
    let mut job = JobPayload::new(name, command);
    job.inputs = inputs.iter().map(|i| i.to_string()).collect();
    job
}

/// Seed a two-job chain: `parent` (start input) feeding `child`.
pub async fn seed_two_job_workflow(harness: &Harness, workflow: &str, instance: &str) {
    let mut parent = shell_job("parent", "true");
    parent.outputs = vec!["child".to_string()];
    let child = downstream_job("child", "true", &["parent"]);
    harness
        .seed(vec![
            waiting_job_token(workflow, instance, &parent),
            waiting_job_token(workflow, instance, &child),
            event_token(workflow, instance, "parent", WORKFLOW_START_INPUT, "e1"),
        ])
        .await;
}
