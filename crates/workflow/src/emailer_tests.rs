// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pb_core::ExecutionRecord;

fn failed_job() -> JobPayload {
    let mut job = JobPayload::new("cook", "false");
    job.history.push(ExecutionRecord {
        info: Some("false".to_string()),
        instance: Some("123".to_string()),
        start_time: Some(1_700_000_000),
        end_time: Some(1_700_000_060),
        exit_code: Some(1),
        ..ExecutionRecord::default()
    });
    job
}

#[test]
fn failure_message_names_job_and_exit_code() {
    let mailer = Arc::new(RecordingMailer::default());
    let emailer = Emailer::new(mailer.clone());
    emailer.send_job_execution_end_message(
        &["ops@example.com".to_string()],
        "wf",
        "123",
        &failed_job(),
    );

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    assert_eq!(sent[0].subject, "wf/123 job cook exited with 1");
    assert!(sent[0].text_body.contains("exit code: 1"));
    assert!(sent[0].text_body.contains("command: false"));
}

#[test]
fn empty_recipient_list_sends_nothing() {
    let mailer = Arc::new(RecordingMailer::default());
    let emailer = Emailer::new(mailer.clone());
    emailer.send_job_execution_end_message(&[], "wf", "123", &failed_job());
    emailer.send_instance_end_message(&[], "wf", "123");
    assert!(mailer.sent().is_empty());
}

#[test]
fn instance_end_and_overrun_messages_render() {
    let mailer = Arc::new(RecordingMailer::default());
    let emailer = Emailer::new(mailer.clone());
    let to = vec!["ops@example.com".to_string()];
    emailer.send_instance_end_message(&to, "wf", "123");
    emailer.send_too_many_running_instances_message(&to, "wf", 3, 2);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].subject.contains("finished"));
    assert!(sent[1].text_body.contains("the configured maximum is 2"));
}
