// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pb_core::{ExecutionRecord, FakeClock, JobPayload, OverrunPolicy};
use pb_master::{LocalClient, MasterHandler};
use pb_store::SqliteStore;
use pb_workflow::{RecordingMailer, StaticParser};
use std::collections::BTreeMap;

struct Fixture {
    store: Arc<SqliteStore>,
    clock: FakeClock,
    client: Arc<dyn MasterClient>,
    parser: Arc<StaticParser>,
    mailer: Arc<RecordingMailer>,
}

fn fixture() -> Fixture {
    let store = Arc::new(SqliteStore::in_memory("scheduler_test").unwrap());
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000_000);
    let handler = Arc::new(MasterHandler::new(Arc::clone(&store), clock.clone()).unwrap());
    Fixture {
        store,
        clock,
        client: Arc::new(LocalClient::new(handler)),
        parser: Arc::new(StaticParser::new()),
        mailer: Arc::new(RecordingMailer::default()),
    }
}

impl Fixture {
    fn scheduler(&self) -> Scheduler<FakeClock> {
        let config = SchedulerConfig {
            name: "scheduler_test".to_string(),
            generation: 0,
            lease_time_sec: 5 * 60,
            delay_time_sec: 5 * 60,
            gang_size: 60,
            poll_time: Duration::from_secs(60),
        };
        Scheduler::new(
            Arc::clone(&self.client),
            self.store.clone(),
            self.parser.clone(),
            self.clock.clone(),
            Arc::new(Emailer::new(self.mailer.clone())),
            config,
        )
    }

    fn schedule(&self, policy: OverrunPolicy, next_run_offset: i64) -> SchedulePayload {
        SchedulePayload {
            workflow: "wf".to_string(),
            next_run_time: self.clock.epoch_secs() + next_run_offset,
            recurrence_seconds: 60,
            overrun_policy: policy,
            parser_params: BTreeMap::new(),
            emails: vec!["ops@example.com".to_string()],
            max_running_instances: None,
        }
    }

    async fn seed_schedule(&self, schedule: &SchedulePayload) {
        let token = Token::with_data("/schedule/workflow/wf", schedule.encode().unwrap());
        self.client.modify(vec![token], vec![]).await.unwrap();
    }

    async fn schedule_token(&self) -> Token {
        self.client
            .query_prefix("/schedule/workflow/wf")
            .await
            .unwrap()
            .remove(0)
    }

    async fn stored_schedule(&self) -> SchedulePayload {
        TokenPayload::schedule(&self.schedule_token().await).unwrap()
    }

    fn define_workflow(&self) {
        self.parser
            .define_workflow("wf", vec![JobPayload::new("solo", "true")], None);
    }

    /// A runnable job token with an open execution record: RUNNING.
    async fn seed_running_instance(&self, instance: &str) {
        let mut job = JobPayload::new("solo", "true");
        job.history.push(ExecutionRecord {
            instance: Some(instance.to_string()),
            start_time: Some(self.clock.epoch_secs() - 30),
            ..ExecutionRecord::default()
        });
        let token = Token::with_data(
            format!("/workflow/wf/{instance}/job/runnable/solo"),
            job.encode().unwrap(),
        );
        self.client.modify(vec![token], vec![]).await.unwrap();
    }

    async fn instance_count(&self) -> usize {
        // Group at the instance level: one group per instance prefix.
        self.client
            .group("/workflow/wf/", Some("/"))
            .await
            .unwrap()
            .len()
    }
}

#[tokio::test]
async fn due_schedule_starts_an_instance_and_advances() {
    let f = fixture();
    f.define_workflow();
    f.seed_schedule(&f.schedule(OverrunPolicy::StartNew, -10)).await;

    let scheduler = f.scheduler();
    assert_eq!(scheduler.run_cycle().await.unwrap(), 1);

    // A fresh instance (id = current millis) was seeded.
    let instance = f.clock.epoch_ms().to_string();
    let names: Vec<String> = f
        .client
        .query_prefix(&format!("/workflow/wf/{instance}/"))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&format!("/workflow/wf/{instance}/job/waiting/solo")));
    assert!(names.iter().any(|n| n.contains("/input/solo/__WORKFLOW_START__/")));

    // The schedule stepped forward and its lease lapses at the new due
    // time.
    let token = f.schedule_token().await;
    let stored = TokenPayload::schedule(&token).unwrap();
    assert!(stored.next_run_time > f.clock.epoch_secs());
    assert_eq!(token.expiration_time, Some(stored.next_run_time));
    assert_eq!(token.owner.as_deref(), Some("scheduler_test"));
}

#[tokio::test]
async fn not_yet_due_token_is_left_untouched() {
    let f = fixture();
    f.define_workflow();
    let schedule = f.schedule(OverrunPolicy::StartNew, 120);
    f.seed_schedule(&schedule).await;

    let scheduler = f.scheduler();
    assert_eq!(scheduler.run_cycle().await.unwrap(), 1);

    assert_eq!(f.instance_count().await, 0);
    assert_eq!(f.stored_schedule().await.next_run_time, schedule.next_run_time);
}

#[tokio::test]
async fn skip_policy_advances_without_running() {
    let f = fixture();
    f.define_workflow();
    f.seed_running_instance("100").await;
    let schedule = f.schedule(OverrunPolicy::Skip, -10);
    f.seed_schedule(&schedule).await;

    let scheduler = f.scheduler();
    scheduler.run_cycle().await.unwrap();

    // No new instance; next_run_time advanced by whole recurrences.
    assert_eq!(f.instance_count().await, 1);
    let stored = f.stored_schedule().await;
    assert!(stored.next_run_time > f.clock.epoch_secs());
    assert_eq!(
        (stored.next_run_time - schedule.next_run_time) % schedule.recurrence_seconds,
        0
    );
}

#[tokio::test]
async fn skip_policy_runs_when_nothing_is_running() {
    let f = fixture();
    f.define_workflow();
    f.seed_schedule(&f.schedule(OverrunPolicy::Skip, -10)).await;

    f.scheduler().run_cycle().await.unwrap();
    assert_eq!(f.instance_count().await, 1);
}

#[tokio::test]
async fn delay_policy_extends_the_lease_without_advancing() {
    let f = fixture();
    f.define_workflow();
    f.seed_running_instance("100").await;
    let schedule = f.schedule(OverrunPolicy::Delay, -10);
    f.seed_schedule(&schedule).await;

    f.scheduler().run_cycle().await.unwrap();

    assert_eq!(f.instance_count().await, 1);
    let token = f.schedule_token().await;
    let stored = TokenPayload::schedule(&token).unwrap();
    assert_eq!(stored.next_run_time, schedule.next_run_time);
    assert_eq!(
        token.expiration_time,
        Some(f.clock.epoch_secs() + 5 * 60)
    );
}

#[tokio::test]
async fn delay_until_success_holds_after_a_failure() {
    let f = fixture();
    f.define_workflow();
    // Latest instance failed and was stamped for archive.
    let mut job = JobPayload::new("solo", "false");
    job.history.push(ExecutionRecord {
        instance: Some("100".to_string()),
        start_time: Some(10),
        end_time: Some(20),
        exit_code: Some(1),
        ..ExecutionRecord::default()
    });
    let mut signal = pb_core::SignalPayload::new(SignalAction::Archive);
    signal
        .attributes
        .insert(pb_core::TIMESTAMP_ATTR.to_string(), "1".to_string());
    f.client
        .modify(
            vec![
                Token::with_data("/workflow/wf/100/job/waiting/solo", job.encode().unwrap()),
                Token::with_data(
                    "/workflow/wf/100/__SIGNAL__/ARCHIVE",
                    signal.encode().unwrap(),
                ),
            ],
            vec![],
        )
        .await
        .unwrap();

    let schedule = f.schedule(OverrunPolicy::DelayUntilSuccess, -10);
    f.seed_schedule(&schedule).await;
    f.scheduler().run_cycle().await.unwrap();

    // Held: no new instance, next_run_time unchanged, lease pushed back.
    assert_eq!(f.instance_count().await, 1);
    assert_eq!(f.stored_schedule().await.next_run_time, schedule.next_run_time);
}

#[tokio::test]
async fn abort_running_signals_the_latest_instance_then_runs() {
    let f = fixture();
    f.define_workflow();
    f.seed_running_instance("100").await;
    f.seed_running_instance("900").await;
    f.seed_schedule(&f.schedule(OverrunPolicy::AbortRunning, -10)).await;

    f.scheduler().run_cycle().await.unwrap();

    // The latest running instance got the ABORT signal.
    let signals = f
        .client
        .query_prefix("/workflow/wf/900/__SIGNAL__/ABORT")
        .await
        .unwrap();
    assert_eq!(signals.len(), 1);
    assert!(f
        .client
        .query_prefix("/workflow/wf/100/__SIGNAL__/ABORT")
        .await
        .unwrap()
        .is_empty());

    // And a new instance started anyway.
    let instance = f.clock.epoch_ms().to_string();
    assert!(!f
        .client
        .query_prefix(&format!("/workflow/wf/{instance}/"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn max_running_instances_gates_the_run_with_an_email() {
    let f = fixture();
    f.define_workflow();
    f.seed_running_instance("100").await;
    let mut schedule = f.schedule(OverrunPolicy::StartNew, -10);
    schedule.max_running_instances = Some(1);
    f.seed_schedule(&schedule).await;

    f.scheduler().run_cycle().await.unwrap();

    // No new instance and no advancement; the run is retried next cycle.
    assert_eq!(f.instance_count().await, 1);
    assert_eq!(f.stored_schedule().await.next_run_time, schedule.next_run_time);
    let sent = f.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("too many running instances"));
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
}

#[tokio::test]
async fn released_tokens_get_fresh_versions_each_cycle() {
    let f = fixture();
    f.define_workflow();
    f.seed_schedule(&f.schedule(OverrunPolicy::StartNew, 120)).await;

    let before = f.schedule_token().await.version;
    f.scheduler().run_cycle().await.unwrap();
    let after = f.schedule_token().await.version;
    assert!(after > before);
}
