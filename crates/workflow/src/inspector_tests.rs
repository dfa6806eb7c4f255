// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{event_token, harness, shell_job, waiting_job_token};
use pb_core::{SignalAction, SignalPayload, Token};

#[tokio::test]
async fn traverses_the_hierarchy_level_by_level() {
    let h = harness();
    let job_a = shell_job("job_a", "true");
    let job_b = shell_job("job_b", "true");
    h.seed(vec![
        waiting_job_token("wf1", "100", &job_a),
        waiting_job_token("wf1", "100", &job_b),
        waiting_job_token("wf1", "200", &job_a),
        waiting_job_token("wf2", "300", &job_a),
        event_token("wf1", "100", "job_a", "__WORKFLOW_START__", "e1"),
        event_token("wf1", "100", "job_a", "__WORKFLOW_START__", "e2"),
    ])
    .await;

    let inspector = Inspector::new(Arc::clone(&h.client));

    let mut workflows = inspector.workflow_names().await.unwrap();
    workflows.sort();
    assert_eq!(workflows, vec!["wf1".to_string(), "wf2".to_string()]);

    let mut instances = inspector.workflow_instances("wf1").await.unwrap();
    instances.sort();
    assert_eq!(instances, vec!["100".to_string(), "200".to_string()]);

    let mut jobs = inspector
        .job_names("wf1", "100", JobState::Waiting)
        .await
        .unwrap();
    jobs.sort();
    assert_eq!(jobs, vec!["job_a".to_string(), "job_b".to_string()]);
    assert!(inspector
        .job_names("wf1", "100", JobState::Runnable)
        .await
        .unwrap()
        .is_empty());

    let mut events = inspector
        .event_names("wf1", "100", "job_a", "__WORKFLOW_START__")
        .await
        .unwrap();
    events.sort();
    assert_eq!(events, vec!["e1".to_string(), "e2".to_string()]);
}

#[tokio::test]
async fn signal_tokens_are_not_workflows_or_instances() {
    let h = harness();
    h.seed(vec![
        waiting_job_token("wf1", "100", &shell_job("job_a", "true")),
        Token::with_data(
            "/workflow/__SIGNAL__/DRAIN",
            SignalPayload::new(SignalAction::Drain).encode().unwrap(),
        ),
        Token::with_data(
            "/workflow/wf1/__SIGNAL__/DRAIN",
            SignalPayload::new(SignalAction::Drain).encode().unwrap(),
        ),
    ])
    .await;

    let inspector = Inspector::new(Arc::clone(&h.client));
    assert_eq!(inspector.workflow_names().await.unwrap(), vec!["wf1".to_string()]);
    assert_eq!(
        inspector.workflow_instances("wf1").await.unwrap(),
        vec!["100".to_string()]
    );
}
