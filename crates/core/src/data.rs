// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payloads stored in the token `data` field.
//!
//! Payloads are a tagged union serialized as JSON. Forward compatibility is
//! field-level: every field added after first release carries a serde
//! default so records written by older masters still deserialize.

use crate::name::WORKFLOW_START_INPUT;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signal attribute key holding the process generation of an EXIT signal.
pub const GENERATION_ATTR: &str = "GENERATION";
/// Signal attribute key holding a timestamp (ABORT time, ARCHIVE deadline).
pub const TIMESTAMP_ATTR: &str = "TIMESTAMP";

/// Property keys with this prefix flow onto downstream events.
pub const EVENT_ATTRIBUTE_PREFIX: &str = "EVENT_ATTR:";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("token {0} carries no data")]
    Missing(String),
    #[error("payload decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token {name} holds a {found} payload, expected {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// The tagged union of everything a token can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenPayload {
    Job(JobPayload),
    Event(EventPayload),
    Signal(SignalPayload),
    Schedule(SchedulePayload),
}

impl TokenPayload {
    pub fn encode(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(data: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Decode the payload of a token, failing if the token has no data.
    pub fn of(token: &Token) -> Result<Self, PayloadError> {
        let data = token
            .data
            .as_deref()
            .ok_or_else(|| PayloadError::Missing(token.name.clone()))?;
        Self::decode(data)
    }

    fn kind(&self) -> &'static str {
        match self {
            TokenPayload::Job(_) => "job",
            TokenPayload::Event(_) => "event",
            TokenPayload::Signal(_) => "signal",
            TokenPayload::Schedule(_) => "schedule",
        }
    }
}

macro_rules! payload_accessors {
    ($( $variant:ident, $ty:ty, $expect:ident );+ $(;)?) => {
        impl TokenPayload {
            $(
                /// Decode a token expecting this payload variant.
                pub fn $expect(token: &Token) -> Result<$ty, PayloadError> {
                    match Self::of(token)? {
                        TokenPayload::$variant(inner) => Ok(inner),
                        other => Err(PayloadError::WrongKind {
                            name: token.name.clone(),
                            expected: stringify!($expect),
                            found: other.kind(),
                        }),
                    }
                }
            )+
        }

        $(
            impl $ty {
                /// Serialize into the token `data` representation.
                pub fn encode(&self) -> Result<String, PayloadError> {
                    TokenPayload::$variant(self.clone()).encode()
                }
            }
        )+
    };
}

payload_accessors! {
    Job, JobPayload, job;
    Event, EventPayload, event;
    Signal, SignalPayload, signal;
    Schedule, SchedulePayload, schedule;
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event posted to a job input, representing satisfaction of one
/// dependency edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EventPayload {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            creator: Some(creator.into()),
            attributes: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Record of a single job execution, kept in the job history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Workflow instance this execution belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_exit_code: Option<i32>,
    /// The events consumed when this execution was made runnable.
    #[serde(default)]
    pub events: Vec<EventPayload>,
    /// Properties extracted from `PINBALL:key=value` log lines.
    /// Values accumulate into a deduplicated list per key.
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
    /// Log type (stdout/stderr/pinlog) to file path.
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
}

impl ExecutionRecord {
    /// Append a property value, keeping the per-key list unique.
    pub fn add_property(&mut self, key: &str, value: &str) -> bool {
        let values = self.properties.entry(key.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            return false;
        }
        values.push(value.to_string());
        true
    }

    /// Properties destined for downstream events (`EVENT_ATTR:` keys,
    /// prefix stripped, list values comma-joined).
    pub fn event_attributes(&self) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        for (key, values) in &self.properties {
            if let Some(attr) = key.strip_prefix(EVENT_ATTRIBUTE_PREFIX) {
                result.insert(attr.to_string(), values.join(","));
            }
        }
        result
    }
}

/// A shell job: inputs, outputs, command, and execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub name: String,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub retry_delay_sec: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_timeout_sec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_timeout_sec: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
    /// Condition jobs poll until they succeed; their history is truncated
    /// to the attempt window.
    #[serde(default)]
    pub is_condition: bool,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_template: Option<String>,
    #[serde(default)]
    pub history: Vec<ExecutionRecord>,
    /// Events pending attachment to the next execution record, set at the
    /// waiting-to-runnable transition.
    #[serde(default)]
    pub events: Vec<EventPayload>,
}

fn default_max_attempts() -> u32 {
    1
}

impl JobPayload {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: vec![WORKFLOW_START_INPUT.to_string()],
            outputs: Vec::new(),
            emails: Vec::new(),
            max_attempts: 1,
            retry_delay_sec: 0,
            warn_timeout_sec: None,
            abort_timeout_sec: None,
            disabled: false,
            is_condition: false,
            command: command.into(),
            cleanup_template: None,
            history: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn last_record(&self) -> Option<&ExecutionRecord> {
        self.history.last()
    }

    pub fn last_record_mut(&mut self) -> Option<&mut ExecutionRecord> {
        self.history.last_mut()
    }

    /// Decide whether a failed execution should be retried: the number of
    /// failed records in the current instance must stay below
    /// `max_attempts`. Earlier successful runs (a redone execution) do not
    /// count against the budget.
    pub fn should_retry(&self) -> bool {
        let Some(last) = self.history.last() else {
            return false;
        };
        let current_instance = last.instance.clone();
        let mut failed_runs = 0;
        for record in self.history.iter().rev() {
            if record.instance != current_instance {
                break;
            }
            if record.exit_code.unwrap_or(0) != 0 {
                failed_runs += 1;
            }
            if failed_runs >= self.max_attempts {
                return false;
            }
        }
        true
    }

    /// Condition jobs accumulate many attempts; cap their history at the
    /// attempt window.
    pub fn truncate_history(&mut self) {
        if self.is_condition && self.history.len() > self.max_attempts as usize {
            let skip = self.history.len() - self.max_attempts as usize;
            self.history.drain(..skip);
        }
    }

    /// Refresh configuration from a newly parsed job definition. Topology
    /// (inputs and outputs), history, and pending events are preserved.
    pub fn reload(&mut self, new_job: &JobPayload) {
        self.emails = new_job.emails.clone();
        self.max_attempts = new_job.max_attempts;
        self.retry_delay_sec = new_job.retry_delay_sec;
        self.warn_timeout_sec = new_job.warn_timeout_sec;
        self.abort_timeout_sec = new_job.abort_timeout_sec;
        self.command = new_job.command.clone();
        self.cleanup_template = new_job.cleanup_template.clone();
    }

    /// Merge attributes of the triggering events of the latest execution.
    /// Values of an attribute present in several events are comma-joined.
    pub fn consolidated_event_attributes(&self) -> BTreeMap<String, String> {
        let mut result: BTreeMap<String, String> = BTreeMap::new();
        let Some(last) = self.history.last() else {
            return result;
        };
        for event in &last.events {
            for (key, value) in &event.attributes {
                match result.get_mut(key) {
                    Some(existing) => {
                        existing.push(',');
                        existing.push_str(value);
                    }
                    None => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        result
    }

    /// Specialize the command with attribute values extracted from the
    /// triggering events. `%(attr)s` placeholders with no matching
    /// attribute are replaced with the empty string.
    pub fn customize_command(&self) -> String {
        substitute_template(&self.command, &self.consolidated_event_attributes())
    }
}

/// Replace `%(key)s` placeholders in a template. Unknown keys render as "".
pub fn substitute_template(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find(")s") {
            Some(end) => {
                let key = &after[..end];
                if let Some(value) = values.get(key) {
                    result.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Out-of-band operator actions communicated through signal tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    /// Finish currently running jobs but do not start new ones.
    Drain,
    /// Abort all running jobs, do not start new ones.
    Abort,
    /// Archive the workflow instance once no runnable jobs remain.
    Archive,
    /// Shut down the worker. Meaningful at the top level only.
    Exit,
}

crate::simple_display! {
    SignalAction {
        Drain => "DRAIN",
        Abort => "ABORT",
        Archive => "ARCHIVE",
        Exit => "EXIT",
    }
}

impl std::str::FromStr for SignalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAIN" => Ok(SignalAction::Drain),
            "ABORT" => Ok(SignalAction::Abort),
            "ARCHIVE" => Ok(SignalAction::Archive),
            "EXIT" => Ok(SignalAction::Exit),
            other => Err(format!("unknown signal action {other}")),
        }
    }
}

/// Payload of a signal token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub action: SignalAction,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SignalPayload {
    pub fn new(action: SignalAction) -> Self {
        Self {
            action,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| v.parse().ok())
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// What to do when a schedule fires while a previous run is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrunPolicy {
    /// Skip execution if already running.
    Skip,
    /// Abort the running instance before starting a new one.
    AbortRunning,
    /// Delay the execution until the previous one finishes.
    Delay,
    /// Delay the execution until the previous one succeeds.
    DelayUntilSuccess,
    /// Start a new instance in parallel to currently running ones.
    StartNew,
}

crate::simple_display! {
    OverrunPolicy {
        Skip => "SKIP",
        AbortRunning => "ABORT_RUNNING",
        Delay => "DELAY",
        DelayUntilSuccess => "DELAY_UNTIL_SUCCESS",
        StartNew => "START_NEW",
    }
}

impl std::str::FromStr for OverrunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SKIP" => Ok(OverrunPolicy::Skip),
            "ABORT_RUNNING" => Ok(OverrunPolicy::AbortRunning),
            "DELAY" => Ok(OverrunPolicy::Delay),
            "DELAY_UNTIL_SUCCESS" => Ok(OverrunPolicy::DelayUntilSuccess),
            "START_NEW" => Ok(OverrunPolicy::StartNew),
            other => Err(format!("unknown overrun policy {other}")),
        }
    }
}

/// Payload of a schedule token: a workflow's recurrence and overrun policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub workflow: String,
    /// Seconds since the epoch of the next due run.
    pub next_run_time: i64,
    pub recurrence_seconds: i64,
    #[serde(default = "default_overrun_policy")]
    pub overrun_policy: OverrunPolicy,
    #[serde(default)]
    pub parser_params: BTreeMap<String, String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_running_instances: Option<u32>,
}

fn default_overrun_policy() -> OverrunPolicy {
    OverrunPolicy::Skip
}

impl SchedulePayload {
    pub fn is_due(&self, now_secs: i64) -> bool {
        self.next_run_time <= now_secs
    }

    /// Step `next_run_time` forward by whole recurrences until it clears
    /// the current time. Stepping by whole periods keeps run times aligned
    /// with the original phase of the schedule.
    pub fn advance_next_run_time(&mut self, now_secs: i64) {
        while self.next_run_time <= now_secs {
            self.next_run_time += self.recurrence_seconds.max(1);
        }
    }
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
