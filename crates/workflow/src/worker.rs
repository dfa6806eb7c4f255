// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker loop: claim runnable jobs, execute them, transition tokens.
//!
//! A job has one or more inputs and zero or more outputs; an output of an
//! upstream job connects to an input of a downstream job. A job starts
//! waiting and becomes runnable once every input holds at least one event
//! token; promotion consumes one event per input. Runnable tokens are
//! claimed under a renewable lease, executed, and moved back to waiting
//! with an updated history. Lease loss hands the job to another worker,
//! so jobs are assumed idempotent.

use crate::archiver::Archiver;
use crate::emailer::Emailer;
use crate::executor::{ExecutorShared, ShellJobExecutor};
use crate::inspector::Inspector;
use crate::signaller::Signaller;
use crate::status::StatusReader;
use pb_core::{
    unique_name, Clock, EventPayload, JobPayload, JobState, Name, PinballConfig, SignalAction,
    SignalPayload, Token, TokenPayload, TIMESTAMP_ATTR,
};
use pb_master::{ClientError, MasterClient};
use pb_store::Store;
use pb_wire::Query;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique self-name, recorded as token owner.
    pub name: String,
    pub generation: u64,
    /// Base polling delay between idle cycles (randomized 1x-2x).
    pub poll_time: Duration,
    /// Delay between successive master queries while scanning instances.
    pub inter_query_delay: Duration,
    /// How long a claimed job token is owned before it must be renewed.
    pub lease_time_sec: i64,
    pub logs_dir: PathBuf,
    /// How long a finished instance lingers before archival.
    pub archive_delay_sec: i64,
}

impl WorkerConfig {
    pub fn from_config(config: &PinballConfig) -> Self {
        Self {
            name: unique_name("worker"),
            generation: config.generation,
            poll_time: Duration::from_secs(config.worker_poll_time_sec),
            inter_query_delay: Duration::from_secs(5),
            lease_time_sec: 20 * 60,
            logs_dir: config.local_logs_dir.clone(),
            archive_delay_sec: config.archive_delay_sec,
        }
    }
}

struct OwnedJob {
    token: Token,
    workflow: String,
    instance: String,
    job: String,
}

pub struct Worker<C: Clock> {
    client: Arc<dyn MasterClient>,
    inspector: Inspector,
    status: StatusReader,
    clock: C,
    emailer: Arc<Emailer>,
    config: WorkerConfig,
}

impl<C: Clock> Worker<C> {
    pub fn new(
        client: Arc<dyn MasterClient>,
        store: Arc<dyn Store>,
        clock: C,
        emailer: Arc<Emailer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inspector: Inspector::new(Arc::clone(&client)),
            status: StatusReader::new(store),
            client,
            clock,
            emailer,
            config,
        }
    }

    /// Run until an EXIT signal addressed at this generation appears.
    pub async fn run(&self) {
        tracing::info!(worker = self.config.name, "running worker");
        loop {
            match self.run_once().await {
                Ok(CycleOutcome::Exit) => {
                    tracing::info!(worker = self.config.name, "exiting worker");
                    return;
                }
                Ok(CycleOutcome::Executed) => {}
                Ok(CycleOutcome::Idle) => self.idle_sleep().await,
                Err(err) => {
                    tracing::warn!(worker = self.config.name, error = %err, "worker cycle failed");
                    self.idle_sleep().await;
                }
            }
        }
    }

    /// Keep claiming and executing until a full scan finds nothing
    /// runnable. Drives tests and drain-then-stop tooling.
    pub async fn run_until_idle(&self) {
        loop {
            match self.run_once().await {
                Ok(CycleOutcome::Executed) => {}
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(worker = self.config.name, error = %err, "worker cycle failed");
                    return;
                }
            }
        }
    }

    async fn idle_sleep(&self) {
        tokio::time::sleep(randomized(self.config.poll_time)).await;
    }

    /// One worker cycle: consult global signals, try to claim a runnable
    /// job anywhere, execute it.
    async fn run_once(&self) -> Result<CycleOutcome, ClientError> {
        let signaller = Signaller::new(
            Arc::clone(&self.client),
            None,
            None,
            self.config.generation,
        )
        .await?;
        if signaller.is_action_set(SignalAction::Exit) {
            return Ok(CycleOutcome::Exit);
        }
        if signaller.is_action_set(SignalAction::Drain) {
            return Ok(CycleOutcome::Idle);
        }
        match self.own_runnable_job_token().await? {
            Some(owned) => {
                self.execute_job(owned).await;
                Ok(CycleOutcome::Executed)
            }
            None => Ok(CycleOutcome::Idle),
        }
    }

    /// Scan workflows and instances (shuffled against starvation) for a
    /// runnable job token to own.
    async fn own_runnable_job_token(&self) -> Result<Option<OwnedJob>, ClientError> {
        let mut workflows = self.inspector.workflow_names().await?;
        workflows.shuffle(&mut rand::thread_rng());
        for workflow in workflows {
            let mut instances = self.inspector.workflow_instances(&workflow).await?;
            instances.shuffle(&mut rand::thread_rng());
            tokio::time::sleep(self.config.inter_query_delay).await;
            for instance in instances {
                if !self.process_signals(&workflow, &instance).await {
                    continue;
                }
                self.make_runnable(&workflow, &instance).await;
                if let Some(token) = self.claim_runnable(&workflow, &instance).await? {
                    let Some(job) = Name::from_job_token_name(&token.name).job else {
                        continue;
                    };
                    return Ok(Some(OwnedJob {
                        token,
                        workflow,
                        instance,
                        job,
                    }));
                }
            }
            tokio::time::sleep(self.config.inter_query_delay).await;
        }
        Ok(None)
    }

    /// Handle the instance's signals. Returns true iff the worker should
    /// execute jobs in this instance.
    async fn process_signals(&self, workflow: &str, instance: &str) -> bool {
        let mut signaller = match Signaller::new(
            Arc::clone(&self.client),
            Some(workflow),
            Some(instance),
            self.config.generation,
        )
        .await
        {
            Ok(signaller) => signaller,
            Err(err) => {
                tracing::warn!(workflow, instance, error = %err, "signal query failed");
                return false;
            }
        };
        if signaller.is_action_set(SignalAction::Exit) {
            return false;
        }
        if signaller.is_action_set(SignalAction::Archive) && self.is_done(workflow, instance).await
        {
            self.handle_archive(workflow, instance, &mut signaller).await;
            return false;
        }
        if signaller.is_action_set(SignalAction::Abort) {
            let archiver = Archiver::new(Arc::clone(&self.client), workflow, instance);
            match archiver.archive_if_aborted(self.clock.epoch_secs()).await {
                Ok(true) => self.send_instance_end_email(workflow, instance),
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(workflow, instance, error = %err, "abort archival failed")
                }
            }
            return false;
        }
        !signaller.is_action_set(SignalAction::Drain)
    }

    /// A finished instance lingers for the archive delay; the worker that
    /// stamps the deadline also sends the end-of-instance email.
    async fn handle_archive(&self, workflow: &str, instance: &str, signaller: &mut Signaller) {
        let deadline = self.clock.epoch_secs() + self.config.archive_delay_sec;
        match signaller
            .set_attribute_if_missing(
                SignalAction::Archive,
                TIMESTAMP_ATTR,
                &deadline.to_string(),
            )
            .await
        {
            Ok(true) => self.send_instance_end_email(workflow, instance),
            Ok(false) => {
                let Some(deadline) =
                    signaller.get_attribute(SignalAction::Archive, TIMESTAMP_ATTR)
                else {
                    return;
                };
                let Ok(deadline) = deadline.parse::<i64>() else {
                    return;
                };
                let archiver = Archiver::new(Arc::clone(&self.client), workflow, instance);
                if let Err(err) = archiver
                    .archive_if_expired(deadline, self.clock.epoch_secs())
                    .await
                {
                    tracing::warn!(workflow, instance, error = %err, "archival failed");
                }
            }
            Err(err) => {
                tracing::warn!(workflow, instance, error = %err, "archive stamp failed")
            }
        }
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Try to promote every waiting job of the instance.
    async fn make_runnable(&self, workflow: &str, instance: &str) -> bool {
        let mut name = Name::with_instance(workflow, instance);
        name.job_state = Some(JobState::Waiting);
        let waiting = match self.client.query_prefix(&name.job_state_prefix()).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!(workflow, instance, error = %err, "waiting query failed");
                return false;
            }
        };
        for token in waiting {
            if !self.make_job_runnable(&token).await {
                return false;
            }
        }
        true
    }

    /// Promote one waiting job if a full set of triggering events exists:
    /// one event per input, consumed in the same Modify that writes the
    /// runnable token.
    async fn make_job_runnable(&self, job_token: &Token) -> bool {
        let name = Name::from_job_token_name(&job_token.name);
        let (Some(workflow), Some(instance), Some(job_name)) =
            (&name.workflow, &name.instance, &name.job)
        else {
            return true;
        };
        let job = match TokenPayload::job(job_token) {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(token = %job_token.name, error = %err, "malformed job payload");
                return true;
            }
        };
        if job.inputs.is_empty() {
            return true;
        }

        let mut queries = Vec::with_capacity(job.inputs.len());
        for input in &job.inputs {
            let mut input_name = Name::with_instance(workflow, instance);
            input_name.job = Some(job_name.clone());
            input_name.input = Some(input.clone());
            queries.push(Query::with_max(input_name.input_prefix(), 1));
        }
        let results = match self.client.query(queries).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(token = %job_token.name, error = %err, "input query failed");
                return false;
            }
        };

        // One triggering event per input; any empty input leaves the job
        // waiting.
        let mut triggering = Vec::with_capacity(results.len());
        for mut events in results {
            match events.drain(..).next() {
                Some(event) => triggering.push(event),
                None => return true,
            }
        }
        self.move_job_token_to_runnable(job_token, job, triggering)
            .await
    }

    async fn move_job_token_to_runnable(
        &self,
        job_token: &Token,
        mut job: JobPayload,
        triggering: Vec<Token>,
    ) -> bool {
        for event_token in &triggering {
            match TokenPayload::event(event_token) {
                Ok(event) => job.events.push(event),
                Err(err) => {
                    tracing::warn!(token = %event_token.name, error = %err, "malformed event payload");
                    job.events.push(EventPayload::default());
                }
            }
        }
        let mut name = Name::from_job_token_name(&job_token.name);
        name.job_state = Some(JobState::Runnable);
        let data = match job.encode() {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(token = %job_token.name, error = %err, "job payload failed to serialize");
                return false;
            }
        };
        let mut runnable = Token::with_data(name.job_token_name(), data);
        runnable.priority = job_token.priority;

        let mut deletes = triggering;
        deletes.push(job_token.clone());
        match self.client.modify(vec![runnable], deletes).await {
            Ok(_) => true,
            Err(err) if err.code().is_some() => {
                // Another worker raced us to this promotion; it will have
                // produced the same transition.
                tracing::debug!(token = %job_token.name, error = %err, "promotion lost a race");
                false
            }
            Err(err) => {
                tracing::warn!(token = %job_token.name, error = %err, "promotion failed");
                false
            }
        }
    }

    /// An instance is done when promotion makes no progress, no runnable
    /// tokens exist, and the waiting set did not change underneath us.
    async fn is_done(&self, workflow: &str, instance: &str) -> bool {
        let mut waiting_name = Name::with_instance(workflow, instance);
        waiting_name.job_state = Some(JobState::Waiting);
        let waiting_prefix = waiting_name.job_state_prefix();
        let snapshot = match self.client.query_prefix(&waiting_prefix).await {
            Ok(tokens) => version_set(&tokens),
            Err(_) => return false,
        };
        if !self.make_runnable(workflow, instance).await {
            return false;
        }

        let mut runnable_name = Name::with_instance(workflow, instance);
        runnable_name.job_state = Some(JobState::Runnable);
        match self
            .client
            .query_prefix(&runnable_name.job_state_prefix())
            .await
        {
            Ok(tokens) if tokens.is_empty() => {}
            _ => return false,
        }

        match self.client.query_prefix(&waiting_prefix).await {
            Ok(tokens) => version_set(&tokens) == snapshot,
            Err(_) => false,
        }
    }

    async fn claim_runnable(
        &self,
        workflow: &str,
        instance: &str,
    ) -> Result<Option<Token>, ClientError> {
        let mut name = Name::with_instance(workflow, instance);
        name.job_state = Some(JobState::Runnable);
        let tokens = self
            .client
            .query_and_own(
                Query::with_max(name.job_state_prefix(), 1),
                &self.config.name,
                self.clock.epoch_secs() + self.config.lease_time_sec,
            )
            .await?;
        Ok(tokens.into_iter().next())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn execute_job(&self, owned: OwnedJob) {
        let job = match TokenPayload::job(&owned.token) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(token = %owned.token.name, error = %err, "owned token is not a job");
                return;
            }
        };
        let executor = ShellJobExecutor::new(
            &owned.workflow,
            &owned.instance,
            &owned.job,
            job,
            &self.config.logs_dir,
            self.clock.clone(),
            Arc::clone(&self.emailer),
            self.status.schedule_emails(&owned.workflow),
        );
        let owned_token = Arc::new(Mutex::new(owned.token.clone()));

        let mut success = executor.prepare(&self.config.name);
        if success {
            success = self
                .update_owned_token(&owned_token, executor.job())
                .await;
            if success {
                let cancel = CancellationToken::new();
                let renewer = self.spawn_lease_renewer(
                    executor.shared(),
                    Arc::clone(&owned_token),
                    owned.workflow.clone(),
                    owned.instance.clone(),
                    cancel.clone(),
                );
                success = executor.execute().await;
                // Let an in-flight renewal finish so the token version in
                // hand matches the master before the final transition.
                cancel.cancel();
                let _ = renewer.await;
            }
        }

        let final_job = executor.job();
        let final_token = owned_token.lock().clone();
        if success {
            self.move_job_token_to_waiting(&final_token, final_job, true)
                .await;
        } else if final_job.should_retry() {
            self.keep_job_token_in_runnable(&final_token, final_job)
                .await;
        } else {
            let first_failure = !self.is_archive_set(&owned.workflow, &owned.instance).await;
            self.send_job_failure_emails(&owned, &final_job, first_failure);
            self.move_job_token_to_waiting(&final_token, final_job, false)
                .await;
        }

        // If the instance just finished, kick off its archival path.
        self.process_signals(&owned.workflow, &owned.instance).await;
    }

    /// Renew the claimed token's lease at ~half-life, abort the child on
    /// an ABORT signal, and flush property changes to the master. Any
    /// failure to reach the master aborts the child rather than risking a
    /// second concurrent execution after lease loss.
    fn spawn_lease_renewer(
        &self,
        shared: Arc<ExecutorShared>,
        owned_token: Arc<Mutex<Token>>,
        workflow: String,
        instance: String,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let clock = self.clock.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(randomized(config.poll_time)) => {}
                }

                let abort = match Signaller::new(
                    Arc::clone(&client),
                    Some(workflow.as_str()),
                    Some(instance.as_str()),
                    config.generation,
                )
                .await
                {
                    Ok(signaller) => signaller.is_action_set(SignalAction::Abort),
                    // The master is unreachable; err on the side of a
                    // single execution.
                    Err(_) => true,
                };
                if abort {
                    shared.abort();
                    return;
                }

                if let Some(job) = shared.take_dirty_job() {
                    if !modify_owned(&client, &owned_token, Some(job), None).await {
                        shared.abort();
                        return;
                    }
                }

                let now = clock.epoch_secs();
                let expiration = owned_token.lock().expiration_time.unwrap_or(0);
                if expiration < now + config.lease_time_sec / 2 {
                    let renewed = modify_owned(
                        &client,
                        &owned_token,
                        None,
                        Some(now + config.lease_time_sec),
                    )
                    .await;
                    if !renewed {
                        shared.abort();
                        return;
                    }
                }
            }
        })
    }

    async fn update_owned_token(
        &self,
        owned_token: &Arc<Mutex<Token>>,
        job: JobPayload,
    ) -> bool {
        modify_owned(&self.client, owned_token, Some(job), None).await
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Move the owned token back to the waiting group. On success, post
    /// one event per output; when the workflow is finished (terminal job
    /// or failure), attach an ARCHIVE signal.
    async fn move_job_token_to_waiting(
        &self,
        owned_token: &Token,
        job: JobPayload,
        succeeded: bool,
    ) {
        let mut name = Name::from_job_token_name(&owned_token.name);
        name.job_state = Some(JobState::Waiting);
        let data = match job.encode() {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(token = %owned_token.name, error = %err, "job payload failed to serialize");
                return;
            }
        };
        let mut waiting = Token::with_data(name.job_token_name(), data);
        waiting.priority = owned_token.priority;
        let mut updates = vec![waiting];

        if succeeded {
            updates.extend(self.output_event_tokens(owned_token, &job));
        }
        if job.outputs.is_empty() || !succeeded {
            // Terminal or failed job: the workflow instance is done.
            if let (Some(workflow), Some(instance)) = (&name.workflow, &name.instance) {
                if !self.is_archive_set(workflow, instance).await {
                    let signal_name =
                        Name::with_signal(
                            Some(workflow.clone()),
                            Some(instance.clone()),
                            SignalAction::Archive.to_string(),
                        );
                    if let Ok(data) = SignalPayload::new(SignalAction::Archive).encode() {
                        updates.push(Token::with_data(signal_name.signal_token_name(), data));
                    }
                }
            }
        }

        if let Err(err) = self
            .client
            .modify(updates, vec![owned_token.clone()])
            .await
        {
            tracing::warn!(token = %owned_token.name, error = %err, "waiting transition failed");
        }
    }

    fn output_event_tokens(&self, owned_token: &Token, job: &JobPayload) -> Vec<Token> {
        let name = Name::from_job_token_name(&owned_token.name);
        let Some(record) = job.history.last() else {
            return Vec::new();
        };
        let attributes = record.event_attributes();
        let mut tokens = Vec::new();
        for output in &job.outputs {
            let event_name = Name {
                workflow: name.workflow.clone(),
                instance: name.instance.clone(),
                job: Some(output.clone()),
                input: name.job.clone(),
                event: Some(unique_name("event")),
                ..Name::default()
            };
            let event = EventPayload {
                creator: Some(self.config.name.clone()),
                attributes: attributes.clone(),
            };
            match event.encode() {
                Ok(data) => {
                    tokens.push(Token::with_data(event_name.event_token_name(), data));
                }
                Err(err) => {
                    tracing::error!(error = %err, "event payload failed to serialize");
                }
            }
        }
        tokens
    }

    /// Keep the owned token in the runnable group for a retry. A positive
    /// retry delay holds the lease until the delay passes; otherwise the
    /// token is released immediately.
    async fn keep_job_token_in_runnable(&self, owned_token: &Token, job: JobPayload) {
        let mut token = owned_token.clone();
        match job.encode() {
            Ok(data) => token.data = Some(data),
            Err(err) => {
                tracing::error!(token = %token.name, error = %err, "job payload failed to serialize");
                return;
            }
        }
        if job.retry_delay_sec > 0 {
            token.expiration_time = Some(self.clock.epoch_secs() + job.retry_delay_sec);
        } else {
            token.unown();
        }
        if let Err(err) = self.client.modify(vec![token], vec![]).await {
            tracing::warn!(token = %owned_token.name, error = %err, "retry transition failed");
        }
    }

    async fn is_archive_set(&self, workflow: &str, instance: &str) -> bool {
        match Signaller::new(
            Arc::clone(&self.client),
            Some(workflow),
            Some(instance),
            self.config.generation,
        )
        .await
        {
            Ok(signaller) => signaller.is_action_set(SignalAction::Archive),
            Err(_) => false,
        }
    }

    fn send_job_failure_emails(&self, owned: &OwnedJob, job: &JobPayload, first_failure: bool) {
        let mut emails = job.emails.clone();
        if first_failure {
            for email in self.status.schedule_emails(&owned.workflow) {
                if !emails.contains(&email) {
                    emails.push(email);
                }
            }
        }
        self.emailer
            .send_job_execution_end_message(&emails, &owned.workflow, &owned.instance, job);
    }

    fn send_instance_end_email(&self, workflow: &str, instance: &str) {
        let emails = self.status.schedule_emails(workflow);
        self.emailer
            .send_instance_end_message(&emails, workflow, instance);
    }
}

enum CycleOutcome {
    Executed,
    Idle,
    Exit,
}

/// Write the owned token back to the master, optionally replacing its
/// payload and/or expiration, and adopt the newly assigned version.
async fn modify_owned(
    client: &Arc<dyn MasterClient>,
    owned_token: &Arc<Mutex<Token>>,
    job: Option<JobPayload>,
    expiration: Option<i64>,
) -> bool {
    let mut token = owned_token.lock().clone();
    if let Some(job) = job {
        match job.encode() {
            Ok(data) => token.data = Some(data),
            Err(err) => {
                tracing::error!(token = %token.name, error = %err, "job payload failed to serialize");
                return false;
            }
        }
    }
    if let Some(expiration) = expiration {
        token.expiration_time = Some(expiration);
    }
    match client.modify(vec![token], vec![]).await {
        Ok(mut updates) if !updates.is_empty() => {
            *owned_token.lock() = updates.remove(0);
            true
        }
        Ok(_) => false,
        Err(err) => {
            tracing::warn!(error = %err, "owned token update failed");
            false
        }
    }
}

fn version_set(tokens: &[Token]) -> std::collections::BTreeSet<(String, i64)> {
    tokens
        .iter()
        .map(|t| (t.name.clone(), t.version))
        .collect()
}

fn randomized(base: Duration) -> Duration {
    base.mul_f64(1.0 + rand::thread_rng().gen::<f64>())
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
