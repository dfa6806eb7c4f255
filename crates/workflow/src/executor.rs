// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell job execution.
//!
//! The job command runs under `sh -c` in its own process group, so one
//! SIGKILL to the group takes down the whole process tree. Stdout and
//! stderr are drained concurrently through bounded line buffers into
//! per-execution log files; lines starting with `PINBALL:` feed the
//! execution record's properties.

use crate::emailer::Emailer;
use crate::line_reader::drain_lines;
use pb_core::{substitute_template, Clock, JobPayload};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lines with this prefix carry `key=value` execution-record properties.
pub const PROPERTY_LINE_PREFIX: &str = "PINBALL:";

const STDOUT_LOG: &str = "stdout";
const STDERR_LOG: &str = "stderr";
/// Log of lines the orchestrator itself writes about the execution.
const PINLOG_LOG: &str = "pinlog";

const TIMEOUT_POLL: Duration = Duration::from_secs(1);

/// State shared between the executor and the lease renewer.
pub struct ExecutorShared {
    aborted: AtomicBool,
    process_group: Mutex<Option<i32>>,
    job: Mutex<JobPayload>,
    dirty: AtomicBool,
}

impl ExecutorShared {
    fn new(job: JobPayload) -> Self {
        Self {
            aborted: AtomicBool::new(false),
            process_group: Mutex::new(None),
            job: Mutex::new(job),
            dirty: AtomicBool::new(false),
        }
    }

    /// Abort the running job by killing its process group.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Some(pgid) = *self.process_group.lock() {
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Snapshot of the job, including the in-progress execution record.
    pub fn job(&self) -> JobPayload {
        self.job.lock().clone()
    }

    /// Take the job snapshot if properties changed since the last take.
    /// The flag resets before the snapshot is taken, so a concurrent
    /// property write is picked up by the next call.
    pub fn take_dirty_job(&self) -> Option<JobPayload> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            Some(self.job.lock().clone())
        } else {
            None
        }
    }

    fn with_job<R>(&self, f: impl FnOnce(&mut JobPayload) -> R) -> R {
        f(&mut self.job.lock())
    }
}

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

pub struct ShellJobExecutor<C: Clock> {
    workflow: String,
    instance: String,
    job_name: String,
    shared: Arc<ExecutorShared>,
    clock: C,
    emailer: Arc<Emailer>,
    /// Schedule-level recipients added to the job's own for warnings.
    extra_emails: Vec<String>,
    logs_dir: PathBuf,
    log_files: Mutex<BTreeMap<&'static str, std::fs::File>>,
    warn_sent: AtomicBool,
}

impl<C: Clock> ShellJobExecutor<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: &str,
        instance: &str,
        job_name: &str,
        job: JobPayload,
        logs_dir: &Path,
        clock: C,
        emailer: Arc<Emailer>,
        extra_emails: Vec<String>,
    ) -> Self {
        Self {
            workflow: workflow.to_string(),
            instance: instance.to_string(),
            job_name: job_name.to_string(),
            shared: Arc::new(ExecutorShared::new(job)),
            clock,
            emailer,
            extra_emails,
            logs_dir: logs_dir.join(workflow).join(instance),
            log_files: Mutex::new(BTreeMap::new()),
            warn_sent: AtomicBool::new(false),
        }
    }

    pub fn shared(&self) -> Arc<ExecutorShared> {
        Arc::clone(&self.shared)
    }

    pub fn job(&self) -> JobPayload {
        self.shared.job()
    }

    /// Prepare the execution: detect a lost lease, append a fresh
    /// execution record, move pending events into it, and open log files.
    /// Returns false if the job should not be executed.
    pub fn prepare(&self, worker_name: &str) -> bool {
        let now = self.clock.epoch_secs();
        let lost = self.shared.with_job(|job| {
            if let Some(record) = job.last_record_mut() {
                if record.start_time.is_some() && record.end_time.is_none() {
                    // The previous owner stopped renewing mid-run; close
                    // its record as failed.
                    record.end_time = Some(now);
                    record.exit_code = Some(1);
                    return true;
                }
            }
            false
        });
        if lost {
            self.append_to_pinlog("executor failed to renew job ownership on time\n");
            return false;
        }

        let (disabled, start_time) = self.shared.with_job(|job| {
            let mut record = pb_core::ExecutionRecord {
                instance: Some(self.instance.clone()),
                start_time: Some(now),
                ..Default::default()
            };
            record.add_property("worker", worker_name);
            record.events = std::mem::take(&mut job.events);
            record.info = Some(if job.disabled {
                "DISABLED".to_string()
            } else {
                job.command.clone()
            });
            job.history.push(record);
            job.truncate_history();
            (job.disabled, now)
        });
        if disabled {
            return true;
        }

        if let Err(err) = std::fs::create_dir_all(&self.logs_dir) {
            tracing::error!(dir = %self.logs_dir.display(), error = %err, "cannot create logs dir");
            self.finish_record(1);
            return false;
        }
        for log_type in [STDOUT_LOG, STDERR_LOG] {
            let path = self.log_path(log_type, start_time);
            match std::fs::File::create(&path) {
                Ok(file) => {
                    self.log_files.lock().insert(log_type, file);
                    self.shared.with_job(|job| {
                        if let Some(record) = job.last_record_mut() {
                            record
                                .logs
                                .insert(log_type.to_string(), path.display().to_string());
                        }
                    });
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "cannot open log file");
                    self.finish_record(1);
                    return false;
                }
            }
        }
        true
    }

    /// Execute the prepared job. Returns true iff the execution succeeded.
    pub async fn execute(&self) -> bool {
        let (disabled, command) = self
            .shared
            .with_job(|job| (job.disabled, job.customize_command()));
        if disabled {
            self.shared.with_job(|job| {
                if let Some(record) = job.last_record_mut() {
                    record.end_time = record.start_time;
                    record.exit_code = Some(0);
                }
            });
            return true;
        }

        let exit_code = match self.run_command(&command, true).await {
            Ok(code) => code,
            Err(message) => {
                self.append_to_pinlog(&format!("{message}\n"));
                1
            }
        };

        if exit_code != 0 {
            let cleanup_exit_code = self.execute_cleanup().await;
            self.shared.with_job(|job| {
                if let Some(record) = job.last_record_mut() {
                    record.cleanup_exit_code = cleanup_exit_code;
                }
            });
        }

        self.finish_record(exit_code);
        self.log_files.lock().clear();
        exit_code == 0
    }

    /// Spawn a shell command in its own process group and drain its
    /// output. `enforce_timeouts` applies the job's warn/abort timeouts
    /// (disabled for cleanup commands).
    async fn run_command(&self, command: &str, enforce_timeouts: bool) -> Result<i32, String> {
        if self.shared.is_aborted() {
            return Ok(1);
        }
        tracing::info!(
            workflow = self.workflow,
            instance = self.instance,
            job = self.job_name,
            command,
            "executing command"
        );
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .process_group(0)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|err| format!("failed to spawn command: {err}"))?;

        if let Some(pid) = child.id() {
            *self.shared.process_group.lock() = Some(pid as i32);
        }
        // Re-check after publishing the group: an abort that raced the
        // spawn would otherwise miss the child.
        if self.shared.is_aborted() {
            self.shared.abort();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move { drain_lines(stdout, tx, OutputLine::Stdout).await });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move { drain_lines(stderr, tx, OutputLine::Stderr).await });
        }
        drop(tx);

        let mut ticker = tokio::time::interval(TIMEOUT_POLL);
        let mut exit_status = None;
        let mut output_open = true;
        while exit_status.is_none() || output_open {
            tokio::select! {
                status = child.wait(), if exit_status.is_none() => {
                    exit_status = Some(status.map_err(|err| format!("wait failed: {err}"))?);
                }
                line = rx.recv(), if output_open => {
                    match line {
                        Some(line) => self.handle_output_line(line),
                        None => output_open = false,
                    }
                }
                _ = ticker.tick() => {
                    if enforce_timeouts {
                        self.check_timeouts();
                    }
                }
            }
        }
        *self.shared.process_group.lock() = None;

        let status = exit_status.ok_or_else(|| "missing exit status".to_string())?;
        Ok(status.code().unwrap_or(-1))
    }

    fn handle_output_line(&self, line: OutputLine) {
        let (log_type, text) = match &line {
            OutputLine::Stdout(text) => (STDOUT_LOG, text),
            OutputLine::Stderr(text) => (STDERR_LOG, text),
        };
        self.write_log(log_type, text);
        self.process_property_line(text);
    }

    /// Parse a `PINBALL:key=value` line into the current execution
    /// record. Values accumulate per key; duplicates are dropped.
    fn process_property_line(&self, line: &str) {
        let Some(rest) = line.trim_end().strip_prefix(PROPERTY_LINE_PREFIX) else {
            return;
        };
        let Some((key, value)) = rest.split_once('=') else {
            tracing::warn!(line, "property line without key=value");
            return;
        };
        if key.is_empty() {
            tracing::warn!(line, "property line with empty key");
            return;
        }
        let added = self.shared.with_job(|job| {
            job.last_record_mut()
                .map(|record| record.add_property(key, value))
                .unwrap_or(false)
        });
        if added {
            self.shared.dirty.store(true, Ordering::SeqCst);
        }
    }

    fn check_timeouts(&self) {
        let (start_time, warn_timeout, abort_timeout) = self.shared.with_job(|job| {
            (
                job.last_record().and_then(|r| r.start_time),
                job.warn_timeout_sec,
                job.abort_timeout_sec,
            )
        });
        let Some(start_time) = start_time else {
            return;
        };
        let now = self.clock.epoch_secs();
        if let Some(abort_timeout) = abort_timeout {
            if start_time + abort_timeout < now {
                self.append_to_pinlog("abort timeout reached\n");
                self.shared.abort();
                return;
            }
        }
        if let Some(warn_timeout) = warn_timeout {
            if start_time + warn_timeout < now && !self.warn_sent.swap(true, Ordering::SeqCst) {
                let job = self.shared.job();
                let mut emails = job.emails.clone();
                for email in &self.extra_emails {
                    if !emails.contains(email) {
                        emails.push(email.clone());
                    }
                }
                self.emailer.send_job_timeout_warning_message(
                    &emails,
                    &self.workflow,
                    &self.instance,
                    &job,
                );
            }
        }
    }

    /// Run the cleanup command with accumulated kill ids substituted in.
    async fn execute_cleanup(&self) -> Option<i32> {
        let (template, kill_ids) = self.shared.with_job(|job| {
            let kill_ids = job
                .last_record()
                .and_then(|r| r.properties.get("kill_id").cloned())
                .unwrap_or_default();
            (job.cleanup_template.clone(), kill_ids)
        });
        let Some(template) = template else {
            self.append_to_pinlog("cleanup template not found.\n");
            return None;
        };
        if kill_ids.is_empty() {
            self.append_to_pinlog("kill_id not found.\n");
        }
        let mut values = BTreeMap::new();
        values.insert("kill_id".to_string(), kill_ids.join(","));
        let command = substitute_template(&template, &values);

        self.write_cleanup_separator("Start");
        let exit_code = match self.run_command(&command, false).await {
            Ok(code) => Some(code),
            Err(message) => {
                self.append_to_pinlog(&format!("{message}\n"));
                Some(1)
            }
        };
        self.write_cleanup_separator("End");
        exit_code
    }

    fn write_cleanup_separator(&self, flag: &str) {
        let message = format!("\n<<<<<<<<<<{flag} of cleanup code logs>>>>>>>>>>\n");
        self.write_log(STDOUT_LOG, &message);
        self.write_log(STDERR_LOG, &message);
    }

    fn finish_record(&self, exit_code: i32) {
        let now = self.clock.epoch_secs();
        self.shared.with_job(|job| {
            if let Some(record) = job.last_record_mut() {
                if record.end_time.is_none() {
                    record.end_time = Some(now);
                    record.exit_code = Some(exit_code);
                }
            }
        });
    }

    fn write_log(&self, log_type: &'static str, line: &str) {
        if let Some(file) = self.log_files.lock().get_mut(log_type) {
            if line.ends_with('\n') {
                let _ = file.write_all(line.as_bytes());
            } else {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    /// Append a line to the orchestrator's own log of this execution,
    /// creating it on first use.
    fn append_to_pinlog(&self, message: &str) {
        let start_time = self
            .shared
            .with_job(|job| job.last_record().and_then(|r| r.start_time))
            .unwrap_or_else(|| self.clock.epoch_secs());
        let mut files = self.log_files.lock();
        if !files.contains_key(PINLOG_LOG) {
            if std::fs::create_dir_all(&self.logs_dir).is_err() {
                return;
            }
            let path = self.log_path(PINLOG_LOG, start_time);
            let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path)
            else {
                return;
            };
            files.insert(PINLOG_LOG, file);
            self.shared.with_job(|job| {
                if let Some(record) = job.last_record_mut() {
                    record
                        .logs
                        .insert(PINLOG_LOG.to_string(), path.display().to_string());
                }
            });
        }
        if let Some(file) = files.get_mut(PINLOG_LOG) {
            let _ = file.write_all(message.as_bytes());
        }
    }

    fn log_path(&self, log_type: &str, timestamp: i64) -> PathBuf {
        self.logs_dir
            .join(format!("{}.{timestamp}.{log_type}", self.job_name))
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
