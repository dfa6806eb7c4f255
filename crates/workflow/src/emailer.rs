// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rendering and dispatch of notification emails.
//!
//! Messages are rendered as text + HTML pairs; the transport is
//! pluggable. The default transport writes the rendered message to the
//! log, which keeps single-host deployments and tests free of SMTP.

use chrono::{TimeZone, Utc};
use pb_core::{ExecutionRecord, JobPayload};
use std::sync::Arc;

/// Message transport.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &[String], subject: &str, text_body: &str, html_body: &str);
}

/// Transport that records messages in the process log.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &[String], subject: &str, text_body: &str, _html_body: &str) {
        tracing::info!(
            to = to.join(", "),
            subject,
            body = text_body,
            "email notification"
        );
    }
}

/// Renders workflow notifications and hands them to the transport.
pub struct Emailer {
    mailer: Arc<dyn Mailer>,
}

impl Emailer {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Notify that a job execution finished with a failure.
    pub fn send_job_execution_end_message(
        &self,
        to: &[String],
        workflow: &str,
        instance: &str,
        job: &JobPayload,
    ) {
        if to.is_empty() {
            return;
        }
        let record = job.history.last();
        let exit_code = record.and_then(|r| r.exit_code).unwrap_or(-1);
        let subject = format!("{}/{} job {} exited with {}", workflow, instance, job.name, exit_code);
        let (text, html) = render_execution(workflow, instance, &job.name, record);
        self.mailer.send(to, &subject, &text, &html);
    }

    /// Warn that a job has been running past its warn timeout.
    pub fn send_job_timeout_warning_message(
        &self,
        to: &[String],
        workflow: &str,
        instance: &str,
        job: &JobPayload,
    ) {
        if to.is_empty() {
            return;
        }
        let subject = format!(
            "{}/{} job {} exceeded its warn timeout",
            workflow, instance, job.name
        );
        let (text, html) = render_execution(workflow, instance, &job.name, job.history.last());
        self.mailer.send(to, &subject, &text, &html);
    }

    /// Notify that a workflow instance finished and is scheduled for
    /// archival.
    pub fn send_instance_end_message(&self, to: &[String], workflow: &str, instance: &str) {
        if to.is_empty() {
            return;
        }
        let subject = format!("workflow {workflow} instance {instance} finished");
        let text = format!("Workflow {workflow} instance {instance} has finished.\n");
        let html = format!("<p>Workflow <b>{workflow}</b> instance <b>{instance}</b> has finished.</p>");
        self.mailer.send(to, &subject, &text, &html);
    }

    /// Notify that a schedule skipped a run because too many instances are
    /// already running.
    pub fn send_too_many_running_instances_message(
        &self,
        to: &[String],
        workflow: &str,
        running: usize,
        max_running: u32,
    ) {
        if to.is_empty() {
            return;
        }
        let subject = format!("workflow {workflow} skipped: too many running instances");
        let text = format!(
            "Workflow {workflow} was not started: {running} instances are running, \
             the configured maximum is {max_running}.\n"
        );
        let html = format!(
            "<p>Workflow <b>{workflow}</b> was not started: {running} instances are \
             running, the configured maximum is {max_running}.</p>"
        );
        self.mailer.send(to, &subject, &text, &html);
    }
}

fn render_execution(
    workflow: &str,
    instance: &str,
    job: &str,
    record: Option<&ExecutionRecord>,
) -> (String, String) {
    let mut rows: Vec<(&str, String)> = vec![
        ("workflow", workflow.to_string()),
        ("instance", instance.to_string()),
        ("job", job.to_string()),
    ];
    if let Some(record) = record {
        if let Some(info) = &record.info {
            rows.push(("command", info.clone()));
        }
        rows.push(("start time", format_time(record.start_time)));
        rows.push(("end time", format_time(record.end_time)));
        if let Some(exit_code) = record.exit_code {
            rows.push(("exit code", exit_code.to_string()));
        }
        for (log_type, path) in &record.logs {
            rows.push(("log", format!("{log_type}: {path}")));
        }
    }

    let text = rows
        .iter()
        .map(|(key, value)| format!("{key}: {value}\n"))
        .collect::<String>();
    let html_rows = rows
        .iter()
        .map(|(key, value)| format!("<tr><td>{key}</td><td>{value}</td></tr>"))
        .collect::<String>();
    let html = format!("<table>{html_rows}</table>");
    (text, html)
}

fn format_time(timestamp: Option<i64>) -> String {
    match timestamp.and_then(|t| Utc.timestamp_opt(t, 0).single()) {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Test transport
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
}

/// Transport that captures messages for assertions.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingMailer {
    sent: parking_lot::Mutex<Vec<SentMail>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Mailer for RecordingMailer {
    fn send(&self, to: &[String], subject: &str, text_body: &str, _html_body: &str) {
        self.sent.lock().push(SentMail {
            to: to.to_vec(),
            subject: subject.to_string(),
            text_body: text_body.to_string(),
        });
    }
}

#[cfg(test)]
#[path = "emailer_tests.rs"]
mod tests;
