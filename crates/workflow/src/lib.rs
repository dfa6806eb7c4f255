// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pb-workflow: workers, signals, archival, and job execution.

mod analyzer;
mod archiver;
mod emailer;
mod executor;
mod inspector;
mod line_reader;
mod parser;
mod signaller;
mod status;
mod worker;

#[cfg(test)]
mod test_helpers;

pub use analyzer::{Analyzer, AnalyzerError};
pub use archiver::{Archiver, CLOCK_SKEW_THRESHOLD_SEC};
pub use emailer::{Emailer, LogMailer, Mailer};
#[cfg(any(test, feature = "test-support"))]
pub use emailer::{RecordingMailer, SentMail};
pub use executor::{ExecutorShared, ShellJobExecutor, PROPERTY_LINE_PREFIX};
pub use inspector::Inspector;
pub use parser::{parser_for, register_parser, StaticParser, WorkflowParser};
pub use signaller::Signaller;
pub use status::{InstanceStatus, StatusError, StatusReader};
pub use worker::{Worker, WorkerConfig};
