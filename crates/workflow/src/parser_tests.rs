// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pb_core::{OverrunPolicy, TokenPayload};

fn two_job_parser() -> StaticParser {
    let parser = StaticParser::new();
    let mut parent = JobPayload::new("parent", "echo parent");
    parent.outputs = vec!["child".to_string()];
    let mut child = JobPayload::new("child", "echo child");
    child.inputs = vec!["parent".to_string()];
    parser.define_workflow("wf", vec![parent, child], None);
    parser
}

#[test]
fn workflow_tokens_seed_jobs_and_start_events() {
    let parser = two_job_parser();
    let tokens = parser.workflow_tokens("wf", "123").unwrap();

    let job_names: Vec<&str> = tokens
        .iter()
        .filter(|t| t.name.contains("/job/"))
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(
        job_names,
        vec![
            "/workflow/wf/123/job/waiting/parent",
            "/workflow/wf/123/job/waiting/child",
        ]
    );

    // Only the dependency-free job gets a start event.
    let events: Vec<&Token> = tokens.iter().filter(|t| t.name.contains("/input/")).collect();
    assert_eq!(events.len(), 1);
    assert!(events[0]
        .name
        .starts_with("/workflow/wf/123/input/parent/__WORKFLOW_START__/"));
    let event = TokenPayload::event(events[0]).unwrap();
    assert_eq!(event.creator.as_deref(), Some("parser"));
}

#[test]
fn unknown_workflow_yields_no_tokens() {
    let parser = two_job_parser();
    assert!(parser.workflow_tokens("missing", "1").unwrap().is_empty());
    assert!(parser.schedule_token("missing").unwrap().is_none());
}

#[test]
fn schedule_token_round_trips() {
    let parser = StaticParser::new();
    let schedule = SchedulePayload {
        workflow: "wf".to_string(),
        next_run_time: 100,
        recurrence_seconds: 60,
        overrun_policy: OverrunPolicy::StartNew,
        parser_params: BTreeMap::new(),
        emails: vec!["ops@example.com".to_string()],
        max_running_instances: Some(2),
    };
    parser.define_workflow("wf", vec![JobPayload::new("a", "true")], Some(schedule.clone()));

    let token = parser.schedule_token("wf").unwrap().unwrap();
    assert_eq!(token.name, "/schedule/workflow/wf");
    assert_eq!(TokenPayload::schedule(&token).unwrap(), schedule);
}

#[test]
fn registry_resolves_by_config_identifier() {
    let parser: Arc<dyn WorkflowParser> = Arc::new(two_job_parser());
    register_parser("registry_test", Arc::clone(&parser));

    let mut config = PinballConfig::default();
    config.parser = "registry_test".to_string();
    let resolved = parser_for(&config).unwrap();
    assert_eq!(resolved.workflow_names(), vec!["wf".to_string()]);

    config.parser = "unregistered".to_string();
    assert!(parser_for(&config).is_none());
}
