// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::emailer::{Emailer, RecordingMailer};
use pb_core::{EventPayload, ExecutionRecord, FakeClock, JobPayload};
use std::time::Instant;

struct Fixture {
    executor: ShellJobExecutor<FakeClock>,
    clock: FakeClock,
    mailer: Arc<RecordingMailer>,
    _dir: tempfile::TempDir,
}

fn fixture(job: JobPayload) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000_000);
    let mailer = Arc::new(RecordingMailer::default());
    let executor = ShellJobExecutor::new(
        "wf",
        "100",
        &job.name.clone(),
        job,
        dir.path(),
        clock.clone(),
        Arc::new(Emailer::new(mailer.clone())),
        vec!["sched@example.com".to_string()],
    );
    Fixture {
        executor,
        clock,
        mailer,
        _dir: dir,
    }
}

fn last_record(executor: &ShellJobExecutor<FakeClock>) -> ExecutionRecord {
    executor.job().history.last().cloned().unwrap()
}

#[tokio::test]
async fn success_captures_output_logs_and_properties() {
    let f = fixture(JobPayload::new(
        "cook",
        "printf 'hello\\nPINBALL:kill_id=exec1/1\\nPINBALL:kill_id=exec1/1\\n'; echo oops >&2",
    ));
    assert!(f.executor.prepare("worker_test"));
    assert!(f.executor.execute().await);

    let record = last_record(&f.executor);
    assert_eq!(record.exit_code, Some(0));
    assert!(record.end_time.is_some());
    assert_eq!(record.info.as_deref(), Some(f.executor.job().command.as_str()));
    // Duplicate property lines collapse.
    assert_eq!(
        record.properties.get("kill_id"),
        Some(&vec!["exec1/1".to_string()])
    );
    assert_eq!(
        record.properties.get("worker"),
        Some(&vec!["worker_test".to_string()])
    );

    let stdout = std::fs::read_to_string(record.logs.get("stdout").unwrap()).unwrap();
    assert!(stdout.contains("hello"));
    assert!(stdout.contains("PINBALL:kill_id=exec1/1"));
    let stderr = std::fs::read_to_string(record.logs.get("stderr").unwrap()).unwrap();
    assert!(stderr.contains("oops"));

    // Property lines mark the job dirty for the lease renewer to flush.
    assert!(f.executor.shared().take_dirty_job().is_some());
    assert!(f.executor.shared().take_dirty_job().is_none());
}

#[tokio::test]
async fn failure_runs_the_cleanup_command() {
    let mut job = JobPayload::new("cook", "echo PINBALL:kill_id=k1; exit 3");
    job.cleanup_template = Some("echo cleaning %(kill_id)s".to_string());
    let f = fixture(job);
    assert!(f.executor.prepare("worker_test"));
    assert!(!f.executor.execute().await);

    let record = last_record(&f.executor);
    assert_eq!(record.exit_code, Some(3));
    assert_eq!(record.cleanup_exit_code, Some(0));
    let stdout = std::fs::read_to_string(record.logs.get("stdout").unwrap()).unwrap();
    assert!(stdout.contains("cleaning k1"));
    assert!(stdout.contains("Start of cleanup code logs"));
    assert!(stdout.contains("End of cleanup code logs"));
}

#[tokio::test]
async fn disabled_job_records_a_synthetic_success() {
    let mut job = JobPayload::new("cook", "exit 7");
    job.disabled = true;
    let f = fixture(job);
    assert!(f.executor.prepare("worker_test"));
    assert!(f.executor.execute().await);

    let record = last_record(&f.executor);
    assert_eq!(record.info.as_deref(), Some("DISABLED"));
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.end_time, record.start_time);
    assert!(record.logs.is_empty());
}

#[tokio::test]
async fn pending_events_move_into_the_new_record() {
    let mut job = JobPayload::new("cook", "true");
    let mut event = EventPayload::new("upstream");
    event
        .attributes
        .insert("day".to_string(), "0701".to_string());
    job.events.push(event);
    let f = fixture(job);
    assert!(f.executor.prepare("worker_test"));

    let job = f.executor.job();
    assert!(job.events.is_empty());
    assert_eq!(job.history.last().unwrap().events.len(), 1);
}

#[tokio::test]
async fn lost_lease_is_detected_in_prepare() {
    let mut job = JobPayload::new("cook", "true");
    job.history.push(ExecutionRecord {
        instance: Some("100".to_string()),
        start_time: Some(500),
        ..ExecutionRecord::default()
    });
    let f = fixture(job);
    assert!(!f.executor.prepare("worker_test"));

    // The stale record is closed out as a failure.
    let record = last_record(&f.executor);
    assert_eq!(record.exit_code, Some(1));
    assert!(record.end_time.is_some());
}

#[tokio::test]
async fn abort_kills_the_process_group() {
    let f = fixture(JobPayload::new("cook", "sleep 30"));
    assert!(f.executor.prepare("worker_test"));
    let shared = f.executor.shared();

    let started = Instant::now();
    let abort = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        shared.abort();
    });
    let success = f.executor.execute().await;
    abort.await.unwrap();

    assert!(!success);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(f.executor.shared().is_aborted());
    let record = last_record(&f.executor);
    assert_ne!(record.exit_code, Some(0));
}

#[tokio::test]
async fn abort_timeout_kills_a_runaway_job() {
    let mut job = JobPayload::new("cook", "sleep 30");
    job.abort_timeout_sec = Some(5);
    let f = fixture(job);
    assert!(f.executor.prepare("worker_test"));

    let clock = f.clock.clone();
    let advance = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        clock.advance(std::time::Duration::from_secs(60));
    });
    let started = Instant::now();
    let success = f.executor.execute().await;
    advance.await.unwrap();

    assert!(!success);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[tokio::test]
async fn warn_timeout_emails_job_and_schedule_recipients_once() {
    let mut job = JobPayload::new("cook", "sleep 2");
    job.warn_timeout_sec = Some(5);
    job.emails = vec!["owner@example.com".to_string()];
    let f = fixture(job);
    assert!(f.executor.prepare("worker_test"));

    let clock = f.clock.clone();
    let advance = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        clock.advance(std::time::Duration::from_secs(60));
    });
    assert!(f.executor.execute().await);
    advance.await.unwrap();

    let sent = f.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("warn timeout"));
    assert!(sent[0].to.contains(&"owner@example.com".to_string()));
    assert!(sent[0].to.contains(&"sched@example.com".to_string()));
}
