// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn job_with_history(records: Vec<ExecutionRecord>) -> JobPayload {
    let mut job = JobPayload::new("cook", "echo cook");
    job.history = records;
    job
}

fn failed_record(instance: &str) -> ExecutionRecord {
    ExecutionRecord {
        instance: Some(instance.to_string()),
        start_time: Some(1),
        end_time: Some(2),
        exit_code: Some(1),
        ..ExecutionRecord::default()
    }
}

#[test]
fn payload_round_trips_through_token_data() {
    let mut job = JobPayload::new("cook", "echo hello");
    job.outputs = vec!["serve".to_string()];
    job.max_attempts = 3;
    let data = job.encode().unwrap();
    let token = Token::with_data("/workflow/wf/1/job/waiting/cook", data);
    let back = TokenPayload::job(&token).unwrap();
    assert_eq!(back, job);
}

#[test]
fn wrong_payload_kind_is_an_error() {
    let data = EventPayload::new("worker_1").encode().unwrap();
    let token = Token::with_data("/workflow/wf/1/input/cook/__WORKFLOW_START__/e1", data);
    assert!(matches!(
        TokenPayload::job(&token),
        Err(PayloadError::WrongKind { .. })
    ));
}

#[test]
fn decoding_applies_field_defaults_for_old_records() {
    // A record written before retry/timeout/condition fields existed.
    let data = r#"{"kind":"job","name":"cook","inputs":["__WORKFLOW_START__"],"command":"true"}"#;
    let job = match TokenPayload::decode(data).unwrap() {
        TokenPayload::Job(job) => job,
        other => panic!("expected job, got {other:?}"),
    };
    assert_eq!(job.max_attempts, 1);
    assert_eq!(job.retry_delay_sec, 0);
    assert!(!job.disabled);
    assert!(job.history.is_empty());
    assert!(job.events.is_empty());
}

#[test]
fn retry_counts_failures_in_current_instance_only() {
    let mut job = job_with_history(vec![failed_record("100"), failed_record("200")]);
    job.max_attempts = 2;
    // Only one failure belongs to instance 200.
    assert!(job.should_retry());

    job.history.push(failed_record("200"));
    assert!(!job.should_retry());
}

#[test]
fn retry_without_history_is_refused() {
    let job = JobPayload::new("cook", "true");
    assert!(!job.should_retry());
}

#[test]
fn earlier_success_does_not_consume_attempt_budget() {
    let mut success = failed_record("200");
    success.exit_code = Some(0);
    let mut job = job_with_history(vec![success, failed_record("200")]);
    job.max_attempts = 2;
    assert!(job.should_retry());
}

#[test]
fn condition_history_is_truncated_to_attempt_window() {
    let mut job = job_with_history(vec![
        failed_record("1"),
        failed_record("2"),
        failed_record("3"),
    ]);
    job.is_condition = true;
    job.max_attempts = 2;
    job.truncate_history();
    assert_eq!(job.history.len(), 2);
    assert_eq!(job.history[0].instance.as_deref(), Some("2"));
}

#[test]
fn reload_preserves_topology_and_history() {
    let mut job = job_with_history(vec![failed_record("1")]);
    job.inputs = vec!["prep".to_string()];
    job.outputs = vec!["serve".to_string()];

    let mut new_job = JobPayload::new("cook", "echo v2");
    new_job.inputs = vec!["changed".to_string()];
    new_job.max_attempts = 5;
    job.reload(&new_job);

    assert_eq!(job.command, "echo v2");
    assert_eq!(job.max_attempts, 5);
    assert_eq!(job.inputs, vec!["prep".to_string()]);
    assert_eq!(job.outputs, vec!["serve".to_string()]);
    assert_eq!(job.history.len(), 1);
}

#[test]
fn event_attributes_merge_with_comma_join() {
    let mut first = EventPayload::new("a");
    first.attributes.insert("date".to_string(), "0701".to_string());
    let mut second = EventPayload::new("b");
    second
        .attributes
        .insert("date".to_string(), "0702".to_string());
    second
        .attributes
        .insert("region".to_string(), "us".to_string());

    let mut job = job_with_history(vec![ExecutionRecord {
        events: vec![first, second],
        ..ExecutionRecord::default()
    }]);
    job.command = "run %(date)s %(region)s %(missing)s".to_string();

    let merged = job.consolidated_event_attributes();
    assert_eq!(merged.get("date").map(String::as_str), Some("0701,0702"));
    assert_eq!(job.customize_command(), "run 0701,0702 us ");
}

#[parameterized(
    plain = { "echo hi", "echo hi" },
    trailing_open = { "echo %(oops", "echo %(oops" },
    known = { "load %(day)s", "load 0701" },
)]
fn template_substitution(template: &str, expected: &str) {
    let mut values = BTreeMap::new();
    values.insert("day".to_string(), "0701".to_string());
    assert_eq!(substitute_template(template, &values), expected);
}

#[test]
fn properties_accumulate_and_dedup() {
    let mut record = ExecutionRecord::default();
    assert!(record.add_property("kill_id", "exec1/1"));
    assert!(record.add_property("kill_id", "exec1/2"));
    assert!(!record.add_property("kill_id", "exec1/1"));
    assert_eq!(
        record.properties.get("kill_id").map(Vec::len),
        Some(2)
    );
}

#[test]
fn execution_record_exports_event_attr_properties() {
    let mut record = ExecutionRecord::default();
    record.add_property("EVENT_ATTR:day", "0701");
    record.add_property("EVENT_ATTR:day", "0702");
    record.add_property("kill_id", "exec1/1");
    let attrs = record.event_attributes();
    assert_eq!(attrs.get("day").map(String::as_str), Some("0701,0702"));
    assert!(!attrs.contains_key("kill_id"));
}

#[parameterized(
    skip = { OverrunPolicy::Skip, "SKIP" },
    abort_running = { OverrunPolicy::AbortRunning, "ABORT_RUNNING" },
    delay = { OverrunPolicy::Delay, "DELAY" },
    delay_until_success = { OverrunPolicy::DelayUntilSuccess, "DELAY_UNTIL_SUCCESS" },
    start_new = { OverrunPolicy::StartNew, "START_NEW" },
)]
fn overrun_policy_names_round_trip(policy: OverrunPolicy, name: &str) {
    assert_eq!(policy.to_string(), name);
    assert_eq!(name.parse::<OverrunPolicy>().unwrap(), policy);
}

#[test]
fn schedule_advance_steps_past_now_keeping_phase() {
    let mut schedule = SchedulePayload {
        workflow: "daily".to_string(),
        next_run_time: 1_000,
        recurrence_seconds: 60,
        overrun_policy: OverrunPolicy::StartNew,
        parser_params: BTreeMap::new(),
        emails: Vec::new(),
        max_running_instances: None,
    };
    schedule.advance_next_run_time(1_130);
    assert_eq!(schedule.next_run_time, 1_180);
    assert!(!schedule.is_due(1_130));
}

#[test]
fn signal_attribute_parses_as_integer() {
    let mut signal = SignalPayload::new(SignalAction::Abort);
    signal
        .attributes
        .insert(TIMESTAMP_ATTR.to_string(), "1234".to_string());
    assert_eq!(signal.attribute_i64(TIMESTAMP_ATTR), Some(1234));
    assert_eq!(signal.attribute_i64(GENERATION_ATTR), None);
}
