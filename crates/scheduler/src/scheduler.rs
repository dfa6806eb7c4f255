// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler loop.
//!
//! Each cycle leases a gang of schedule tokens, evaluates every schedule's
//! overrun policy, seeds new workflow instances through the parser, and
//! releases the tokens by rewriting them. An advanced schedule token's
//! expiration is set to its next run time, so the lease lapses exactly
//! when the schedule becomes due again.

use pb_core::{
    unique_name, Clock, OverrunPolicy, PinballConfig, SchedulePayload, SignalAction, Token,
    TokenPayload, SCHEDULE_PREFIX,
};
use pb_master::{ClientError, MasterClient};
use pb_store::Store;
use pb_wire::Query;
use pb_workflow::{Emailer, Signaller, StatusReader, WorkflowParser};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Unique self-name, recorded as schedule token owner.
    pub name: String,
    pub generation: u64,
    /// How long to own a schedule token while manipulating it.
    pub lease_time_sec: i64,
    /// How long to push back a schedule held by an overrun policy.
    pub delay_time_sec: i64,
    /// How many schedule tokens to lease per cycle.
    pub gang_size: usize,
    /// Sleep between cycles.
    pub poll_time: Duration,
}

impl SchedulerConfig {
    pub fn from_config(config: &PinballConfig) -> Self {
        Self {
            name: unique_name("scheduler"),
            generation: config.generation,
            lease_time_sec: 5 * 60,
            delay_time_sec: 5 * 60,
            gang_size: 60,
            poll_time: Duration::from_secs(60),
        }
    }
}

pub struct Scheduler<C: Clock> {
    client: Arc<dyn MasterClient>,
    status: StatusReader,
    parser: Arc<dyn WorkflowParser>,
    emailer: Arc<Emailer>,
    clock: C,
    config: SchedulerConfig,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        client: Arc<dyn MasterClient>,
        store: Arc<dyn Store>,
        parser: Arc<dyn WorkflowParser>,
        clock: C,
        emailer: Arc<Emailer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            client,
            status: StatusReader::new(store),
            parser,
            emailer,
            clock,
            config,
        }
    }

    pub async fn run(&self) {
        tracing::info!(scheduler = self.config.name, "running scheduler");
        loop {
            match self.run_cycle().await {
                Ok(processed) => {
                    tracing::debug!(
                        scheduler = self.config.name,
                        processed,
                        "schedule cycle complete"
                    );
                }
                Err(err) => {
                    tracing::warn!(scheduler = self.config.name, error = %err, "schedule cycle failed");
                }
            }
            tokio::time::sleep(self.config.poll_time).await;
        }
    }

    /// Lease and process one gang of schedule tokens. Returns how many
    /// tokens were processed.
    pub async fn run_cycle(&self) -> Result<usize, ClientError> {
        let owned = self
            .client
            .query_and_own(
                Query::with_max(SCHEDULE_PREFIX, self.config.gang_size),
                &self.config.name,
                self.clock.epoch_secs() + self.config.lease_time_sec,
            )
            .await?;
        if !owned.is_empty() {
            tracing::info!(
                scheduler = self.config.name,
                count = owned.len(),
                "got schedule token(s) from master"
            );
        }
        let count = owned.len();
        for token in owned {
            self.process_schedule_token(token).await;
        }
        Ok(count)
    }

    /// Evaluate one owned schedule token and release it via Modify.
    async fn process_schedule_token(&self, mut token: Token) {
        let mut seeds = Vec::new();
        match TokenPayload::schedule(&token) {
            Ok(mut schedule) => {
                seeds = self.run_or_reschedule(&mut token, &mut schedule).await;
            }
            Err(err) => {
                tracing::error!(token = %token.name, error = %err, "malformed schedule payload");
            }
        }
        // Release: rewrite the owned token (with any seed tokens) so it
        // gets a fresh version and the expiration chosen above.
        let mut updates = seeds;
        updates.push(token);
        if let Err(err) = self.client.modify(updates, vec![]).await {
            tracing::warn!(scheduler = self.config.name, error = %err, "schedule release failed");
        }
    }

    /// Decide what to do with a due (or not yet due) schedule. Returns the
    /// seed tokens of a new instance when the schedule runs.
    async fn run_or_reschedule(
        &self,
        token: &mut Token,
        schedule: &mut SchedulePayload,
    ) -> Vec<Token> {
        let now = self.clock.epoch_secs();
        if !schedule.is_due(now) {
            // The master may hand out a not-yet-due token under clock
            // skew; leave it for its real due time.
            tracing::info!(token = %token.name, "not the time to run schedule");
            return Vec::new();
        }

        let policy = schedule.overrun_policy;
        let may_run = match policy {
            OverrunPolicy::StartNew => true,
            OverrunPolicy::AbortRunning => self.abort_running(schedule).await,
            // The failure check runs before the running check so a
            // concurrently retried workflow is not misread as runnable.
            OverrunPolicy::DelayUntilSuccess => {
                !self.is_failed(&schedule.workflow) && !self.is_running(&schedule.workflow)
            }
            OverrunPolicy::Skip | OverrunPolicy::Delay => !self.is_running(&schedule.workflow),
        };

        if may_run {
            tracing::info!(token = %token.name, "running schedule");
            let seeds = self.start_instance(schedule).await;
            if !seeds.is_empty() {
                self.advance(token, schedule, now);
            }
            return seeds;
        }

        match policy {
            OverrunPolicy::Skip => {
                tracing::info!(token = %token.name, "skipping schedule, instance still running");
                self.advance(token, schedule, now);
            }
            OverrunPolicy::Delay | OverrunPolicy::DelayUntilSuccess => {
                tracing::info!(token = %token.name, "delaying schedule");
                token.expiration_time = Some(now + self.config.delay_time_sec);
            }
            // AbortRunning only lands here when the abort itself failed;
            // the untouched token comes around again next cycle.
            OverrunPolicy::AbortRunning | OverrunPolicy::StartNew => {}
        }
        Vec::new()
    }

    fn advance(&self, token: &mut Token, schedule: &mut SchedulePayload, now: i64) {
        schedule.advance_next_run_time(now);
        token.expiration_time = Some(schedule.next_run_time);
        match schedule.encode() {
            Ok(data) => token.data = Some(data),
            Err(err) => {
                tracing::error!(token = %token.name, error = %err, "schedule payload failed to serialize")
            }
        }
    }

    /// Seed a fresh instance (id = current millis) through the parser.
    /// Returns no tokens when the run must be skipped.
    async fn start_instance(&self, schedule: &SchedulePayload) -> Vec<Token> {
        if let Some(max_running) = schedule.max_running_instances {
            let running = self.running_instances(&schedule.workflow);
            if running >= max_running as usize {
                tracing::warn!(
                    workflow = schedule.workflow,
                    running,
                    max_running,
                    "too many running instances, skipping run"
                );
                self.emailer.send_too_many_running_instances_message(
                    &schedule.emails,
                    &schedule.workflow,
                    running,
                    max_running,
                );
                return Vec::new();
            }
        }
        let instance = self.clock.epoch_ms().to_string();
        match self.parser.workflow_tokens(&schedule.workflow, &instance) {
            Ok(tokens) if tokens.is_empty() => {
                tracing::warn!(workflow = schedule.workflow, "parser produced no tokens");
                Vec::new()
            }
            Ok(tokens) => {
                tracing::info!(
                    workflow = schedule.workflow,
                    instance,
                    tokens = tokens.len(),
                    "starting instance"
                );
                tokens
            }
            Err(err) => {
                tracing::error!(workflow = schedule.workflow, error = %err, "parser failed");
                Vec::new()
            }
        }
    }

    /// Post an ABORT to the latest running instance. Returns true iff the
    /// schedule may proceed to run.
    async fn abort_running(&self, schedule: &SchedulePayload) -> bool {
        let instance = match self.status.latest_running_instance(&schedule.workflow) {
            Ok(Some(instance)) => instance,
            Ok(None) => return true,
            Err(err) => {
                tracing::warn!(workflow = schedule.workflow, error = %err, "status read failed");
                return false;
            }
        };
        let signaller = Signaller::new(
            Arc::clone(&self.client),
            Some(schedule.workflow.as_str()),
            Some(instance.as_str()),
            self.config.generation,
        )
        .await;
        match signaller {
            Ok(mut signaller) => {
                match signaller
                    .set_action(SignalAction::Abort, self.clock.epoch_secs())
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            workflow = schedule.workflow,
                            instance,
                            "aborted running instance"
                        );
                        true
                    }
                    Err(err) => {
                        tracing::warn!(workflow = schedule.workflow, error = %err, "abort failed");
                        false
                    }
                }
            }
            Err(err) => {
                tracing::warn!(workflow = schedule.workflow, error = %err, "abort failed");
                false
            }
        }
    }

    fn is_running(&self, workflow: &str) -> bool {
        self.status.is_workflow_running(workflow).unwrap_or_else(|err| {
            tracing::warn!(workflow, error = %err, "status read failed");
            true
        })
    }

    fn is_failed(&self, workflow: &str) -> bool {
        self.status.is_workflow_failed(workflow).unwrap_or_else(|err| {
            tracing::warn!(workflow, error = %err, "status read failed");
            true
        })
    }

    fn running_instances(&self, workflow: &str) -> usize {
        let instances = match self.status.instances(workflow) {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(workflow, error = %err, "status read failed");
                return usize::MAX;
            }
        };
        instances
            .into_iter()
            .filter(|instance| {
                self.status
                    .instance_status(workflow, instance)
                    .ok()
                    .flatten()
                    == Some(pb_workflow::InstanceStatus::Running)
            })
            .count()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
