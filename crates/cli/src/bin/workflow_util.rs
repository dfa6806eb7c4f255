// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator commands over workflows, instances, and schedules.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use pb_core::{
    Clock, JobState, Name, PinballConfig, SignalAction, SystemClock, Token, TokenPayload,
    EXPIRATION_NEVER,
};
use pb_master::{MasterClient, RemoteClient};
use pb_store::{NameFilter, SqliteStore, Store};
use pb_wire::Query;
use pb_workflow::{parser_for, Analyzer, InstanceStatus, Signaller, StatusReader, WorkflowParser};
use pinball::output::confirm;
use std::path::PathBuf;
use std::sync::Arc;

/// Bounded retry count for commands racing concurrent token mutations.
const MAX_TRIES: usize = 10;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum OperatorCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Retry,
    Redo,
    Poison,
    Drain,
    Undrain,
    Abort,
    Unabort,
    Exit,
    Unexit,
    Reschedule,
    Unschedule,
    Reload,
    Disable,
    Enable,
    Cleanup,
    RebuildCache,
}

#[derive(Parser)]
#[command(name = "workflow_util", about = "Manipulate Pinball workflows")]
struct Args {
    command: OperatorCommand,

    /// Configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Workflow name.
    #[arg(short, long)]
    workflow: Option<String>,

    /// Workflow instance.
    #[arg(short, long)]
    instance: Option<String>,

    /// Comma separated list of jobs.
    #[arg(short, long)]
    jobs: Option<String>,

    /// Job execution number, 0-based, increasing from the oldest.
    #[arg(short, long)]
    execution: Option<usize>,

    /// Minimum age, in days, of workflow instances to clean up.
    #[arg(short, long, default_value_t = 30)]
    age_days: i64,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    force: bool,
}

struct Ctx {
    client: RemoteClient,
    store: Arc<SqliteStore>,
    status: StatusReader,
    config: PinballConfig,
    args: Args,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pinball::init_tracing();
    let args = Args::parse();
    let config = PinballConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let client = pinball::remote_client(&config, None, None);
    let store = Arc::new(
        SqliteStore::open(&config.store_path, &config.master_name)
            .with_context(|| format!("opening store {}", config.store_path.display()))?,
    );
    let ctx = Ctx {
        client,
        status: StatusReader::new(store.clone()),
        store,
        config,
        args,
    };

    let output = match ctx.args.command {
        OperatorCommand::Start => start(&ctx).await?,
        OperatorCommand::Stop => stop(&ctx).await?,
        OperatorCommand::Pause => pause(&ctx).await?,
        OperatorCommand::Resume => resume(&ctx).await?,
        OperatorCommand::Retry => retry(&ctx).await?,
        OperatorCommand::Redo => redo(&ctx).await?,
        OperatorCommand::Poison => poison(&ctx).await?,
        OperatorCommand::Drain => modify_signal(&ctx, SignalAction::Drain, true).await?,
        OperatorCommand::Undrain => modify_signal(&ctx, SignalAction::Drain, false).await?,
        OperatorCommand::Abort => modify_signal(&ctx, SignalAction::Abort, true).await?,
        OperatorCommand::Unabort => modify_signal(&ctx, SignalAction::Abort, false).await?,
        OperatorCommand::Exit => modify_signal(&ctx, SignalAction::Exit, true).await?,
        OperatorCommand::Unexit => modify_signal(&ctx, SignalAction::Exit, false).await?,
        OperatorCommand::Reschedule => reschedule(&ctx).await?,
        OperatorCommand::Unschedule => unschedule(&ctx).await?,
        OperatorCommand::Reload => reload(&ctx).await?,
        OperatorCommand::Disable => alter(&ctx, true).await?,
        OperatorCommand::Enable => alter(&ctx, false).await?,
        OperatorCommand::Cleanup => cleanup(&ctx).await?,
        OperatorCommand::RebuildCache => rebuild_cache(&ctx).await?,
    };
    print!("{output}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn require_workflow(ctx: &Ctx) -> anyhow::Result<&str> {
    ctx.args
        .workflow
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("this command takes a workflow name (-w)"))
}

fn require_instance(ctx: &Ctx) -> anyhow::Result<&str> {
    ctx.args
        .instance
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("this command takes a workflow instance (-i)"))
}

fn job_list(ctx: &Ctx) -> anyhow::Result<Vec<String>> {
    let jobs = ctx
        .args
        .jobs
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("this command takes a list of jobs (-j)"))?;
    Ok(jobs.split(',').map(str::to_string).collect())
}

fn confirmed(ctx: &Ctx, message: &str) -> bool {
    ctx.args.force || confirm(message)
}

fn parser(ctx: &Ctx) -> anyhow::Result<Arc<dyn WorkflowParser>> {
    parser_for(&ctx.config)
        .ok_or_else(|| anyhow::anyhow!("parser {} is not registered", ctx.config.parser))
}

async fn instance_tokens(ctx: &Ctx, workflow: &str, instance: &str) -> anyhow::Result<Vec<Token>> {
    let prefix = Name::with_instance(workflow, instance).instance_prefix();
    Ok(ctx.client.query_prefix(&prefix).await?)
}

/// Refuse to add load when the schedule's running-instance cap is reached.
fn check_workflow_instances(ctx: &Ctx, workflow: &str) -> anyhow::Result<()> {
    let Some(schedule) = ctx.status.schedule(workflow)? else {
        return Ok(());
    };
    let Some(max_running) = schedule.max_running_instances else {
        return Ok(());
    };
    let mut running = 0;
    for instance in ctx.status.instances(workflow)? {
        if ctx.status.instance_status(workflow, &instance)? == Some(InstanceStatus::Running) {
            running += 1;
        }
    }
    if running >= max_running as usize {
        bail!("too many instances of workflow {workflow} are running ({running}/{max_running})");
    }
    Ok(())
}

async fn signaller(ctx: &Ctx) -> anyhow::Result<Signaller> {
    let client: Arc<dyn MasterClient> =
        Arc::new(pinball::remote_client(&ctx.config, None, None));
    Ok(Signaller::new(
        client,
        ctx.args.workflow.as_deref(),
        ctx.args.instance.as_deref(),
        ctx.config.generation,
    )
    .await?)
}

fn is_job_failed(job_token: &Token) -> bool {
    match TokenPayload::job(job_token) {
        Ok(job) => job
            .history
            .last()
            .is_some_and(|record| record.exit_code.unwrap_or(0) != 0),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Instance lifecycle commands
// ---------------------------------------------------------------------------

async fn start(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    check_workflow_instances(ctx, workflow)?;
    let parser = parser(ctx)?;
    let instance = SystemClock.epoch_ms().to_string();
    let tokens = parser.workflow_tokens(workflow, &instance)?;
    if tokens.is_empty() {
        return Ok(format!("workflow {workflow} not found\n"));
    }
    ctx.client.modify(tokens, vec![]).await?;
    let prefix = Name::with_instance(workflow, &instance).instance_prefix();
    Ok(format!(
        "exported workflow {workflow} instance {instance}.  Its tokens are under {prefix}\n"
    ))
}

async fn stop(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let mut tokens = instance_tokens(ctx, workflow, instance).await?;
    if tokens.is_empty() {
        return Ok(format!("workflow {workflow} instance {instance} not found\n"));
    }
    if !confirmed(ctx, &format!("Remove workflow {workflow} instance {instance}")) {
        return Ok(String::new());
    }
    // Concurrent workers may bump token versions underneath us.
    for tries in 1..=MAX_TRIES {
        let count = tokens.len();
        match ctx.client.modify(vec![], tokens.clone()).await {
            Ok(_) => return Ok(format!("removed {count} token(s) in {tries} tries\n")),
            Err(err) if err.code().is_some() => {
                tokens = instance_tokens(ctx, workflow, instance).await?;
            }
            Err(err) => return Err(err.into()),
        }
    }
    bail!("failed to remove tokens in {MAX_TRIES} tries")
}

async fn pause(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let mut tokens = instance_tokens(ctx, workflow, instance).await?;
    if tokens.is_empty() {
        return Ok(format!("workflow {workflow} instance {instance} not found\n"));
    }
    if !confirmed(ctx, &format!("pause workflow {workflow} instance {instance}")) {
        return Ok(String::new());
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let owner = format!("workflow_util user {user}");
    for tries in 1..=MAX_TRIES {
        for token in &mut tokens {
            token.owner = Some(owner.clone());
            token.expiration_time = Some(EXPIRATION_NEVER);
        }
        let count = tokens.len();
        match ctx.client.modify(tokens.clone(), vec![]).await {
            Ok(_) => return Ok(format!("claimed {count} token(s) in {tries} tries\n")),
            Err(err) if err.code().is_some() => {
                tokens = instance_tokens(ctx, workflow, instance).await?;
            }
            Err(err) => return Err(err.into()),
        }
    }
    bail!("failed to claim token(s) in {MAX_TRIES} tries")
}

async fn resume(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let mut tokens = instance_tokens(ctx, workflow, instance).await?;
    if tokens.is_empty() {
        return Ok(format!("workflow {workflow} instance {instance} not found\n"));
    }
    if !confirmed(ctx, &format!("resume workflow {workflow} instance {instance}")) {
        return Ok(String::new());
    }
    for token in &mut tokens {
        token.unown();
    }
    let count = tokens.len();
    ctx.client.modify(tokens, vec![]).await?;
    Ok(format!("released ownership of {count} token(s)\n"))
}

// ---------------------------------------------------------------------------
// Retry / redo / poison
// ---------------------------------------------------------------------------

async fn retry(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    check_workflow_instances(ctx, workflow)?;
    if !confirmed(ctx, &format!("retry workflow {workflow} instance {instance}")) {
        return Ok(String::new());
    }
    let job_prefix = Name::with_instance(workflow, instance).job_prefix();
    let counts = ctx.client.group(&job_prefix, Some("/")).await?;
    if counts.is_empty() {
        retry_archived(ctx, workflow, instance).await
    } else {
        retry_active(ctx, workflow, instance).await
    }
}

/// Move failed waiting jobs of a live instance back to runnable and drop
/// the ARCHIVE signal.
async fn retry_active(ctx: &Ctx, workflow: &str, instance: &str) -> anyhow::Result<String> {
    let signal_name = Name::with_signal(
        Some(workflow.to_string()),
        Some(instance.to_string()),
        SignalAction::Archive.to_string(),
    )
    .signal_token_name();
    let mut waiting_name = Name::with_instance(workflow, instance);
    waiting_name.job_state = Some(JobState::Waiting);

    let mut results = ctx
        .client
        .query(vec![
            Query::prefix(signal_name.clone()),
            Query::prefix(waiting_name.job_state_prefix()),
        ])
        .await?;
    let waiting = results.pop().unwrap_or_default();
    let signals = results.pop().unwrap_or_default();

    let mut updates = Vec::new();
    let mut deletes: Vec<Token> = signals;
    for job_token in waiting {
        if !is_job_failed(&job_token) {
            continue;
        }
        let mut job = TokenPayload::job(&job_token)?;
        // Re-run with the events that triggered the failed execution.
        if let Some(events) = job.history.last().map(|r| r.events.clone()) {
            if !events.is_empty() {
                job.events = events;
            }
        }
        let mut name = Name::from_job_token_name(&job_token.name);
        name.job_state = Some(JobState::Runnable);
        let mut runnable = Token::with_data(name.job_token_name(), job.encode()?);
        runnable.priority = job_token.priority;
        updates.push(runnable);
        deletes.push(job_token);
    }

    if updates.is_empty() && deletes.is_empty() {
        return Ok(format!(
            "no failed jobs found in workflow {workflow} instance {instance}\n"
        ));
    }
    if updates.is_empty() {
        return Ok(format!(
            "found ARCHIVE token but no failed jobs in workflow {workflow} instance \
             {instance}.  Not changing anything this time\n"
        ));
    }
    let retried = updates.len();
    ctx.client.modify(updates, deletes).await?;
    Ok(format!(
        "retried {retried} job(s) in workflow {workflow} instance {instance}\n"
    ))
}

/// Re-activate an archived instance under a fresh instance id, with the
/// failed jobs runnable right away.
async fn retry_archived(ctx: &Ctx, workflow: &str, instance: &str) -> anyhow::Result<String> {
    let prefix = Name::with_instance(workflow, instance).instance_prefix();
    let archived = ctx.store.read_archived_tokens(&NameFilter::prefix(&prefix))?;
    if archived.is_empty() {
        return Ok(format!("workflow {workflow} instance {instance} not found\n"));
    }

    let new_instance = SystemClock.epoch_ms().to_string();
    let mut updates = Vec::new();
    let mut has_failed_jobs = false;
    for token in &archived {
        let mut event_name = Name::from_event_token_name(&token.name);
        if event_name.event.is_some() {
            event_name.instance = Some(new_instance.clone());
            let mut event = Token::new(event_name.event_token_name());
            event.priority = token.priority;
            event.data = token.data.clone();
            updates.push(event);
            continue;
        }
        let mut job_name = Name::from_job_token_name(&token.name);
        if job_name.job.is_some() {
            if is_job_failed(token) {
                has_failed_jobs = true;
                job_name.job_state = Some(JobState::Runnable);
            }
            job_name.instance = Some(new_instance.clone());
            let mut job = Token::new(job_name.job_token_name());
            job.priority = token.priority;
            job.data = token.data.clone();
            updates.push(job);
            continue;
        }
        // Signal tokens are not carried into the new instance.
    }

    if !has_failed_jobs {
        return Ok(format!(
            "no failed jobs found in workflow {workflow} instance {instance}\n"
        ));
    }
    ctx.client.modify(updates, vec![]).await?;
    let new_prefix = Name::with_instance(workflow, &new_instance).instance_prefix();
    Ok(format!(
        "retried workflow {workflow} instance {instance}.  Its tokens are under {new_prefix}\n"
    ))
}

async fn redo(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let jobs = job_list(ctx)?;
    let execution = ctx
        .args
        .execution
        .ok_or_else(|| anyhow::anyhow!("redo command takes an execution number (-e)"))?;
    if jobs.len() != 1 {
        bail!("redo command takes a single job");
    }
    let job_name = &jobs[0];
    if !confirmed(
        ctx,
        &format!("redo execution {execution} of job {job_name} in workflow {workflow} instance {instance}"),
    ) {
        return Ok(String::new());
    }

    let mut name = Name::with_instance(workflow, instance);
    name.job_state = Some(JobState::Waiting);
    name.job = Some(job_name.clone());
    let token_name = name.job_token_name();
    let owned = ctx
        .client
        .query_and_own(
            Query::with_max(token_name.clone(), 1),
            "workflow_util",
            SystemClock.epoch_secs() + 60,
        )
        .await?;

    // The prefix may have matched a sibling job name; release those.
    let mut updates = Vec::new();
    let mut waiting_job = None;
    for mut token in owned {
        if token.name == token_name {
            waiting_job = Some(token);
        } else {
            token.unown();
            updates.push(token);
        }
    }
    let Some(mut waiting_job) = waiting_job else {
        if !updates.is_empty() {
            ctx.client.modify(updates, vec![]).await?;
        }
        return Ok(
            "workflow must be running, the job must be finished and it cannot be runnable\n"
                .to_string(),
        );
    };

    let mut job = TokenPayload::job(&waiting_job)?;
    let output;
    let mut deletes = Vec::new();
    match job.history.get(execution).cloned() {
        Some(record) => {
            job.events = record.events;
            name.job_state = Some(JobState::Runnable);
            updates.push(Token::with_data(name.job_token_name(), job.encode()?));
            deletes.push(waiting_job);
            output = format!(
                "redoing execution {execution} of job {job_name} in workflow {workflow} \
                 instance {instance}\n"
            );
        }
        None => {
            waiting_job.unown();
            updates.push(waiting_job);
            output = format!("could not find execution {execution} in job history\n");
        }
    }
    ctx.client.modify(updates, deletes).await?;
    Ok(output)
}

async fn poison(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let roots = job_list(ctx)?;
    if !confirmed(ctx, &format!("poison workflow {workflow} roots {roots:?}")) {
        return Ok(String::new());
    }

    let active = match ctx.args.instance.as_deref() {
        Some(instance) => {
            let prefix = Name::with_instance(workflow, instance).job_prefix();
            !ctx.client.group(&prefix, Some("/")).await?.is_empty()
        }
        None => false,
    };

    if active {
        let instance = require_instance(ctx)?;
        let client: Arc<dyn MasterClient> =
            Arc::new(pinball::remote_client(&ctx.config, None, None));
        let mut analyzer = Analyzer::from_client(&client, workflow, instance).await?;
        if analyzer.job_names().is_empty() {
            return Ok(format!("workflow {workflow} instance {instance} not found\n"));
        }
        analyzer.poison(&roots)?;
        let event_tokens = analyzer.new_event_tokens()?;

        // Poisoning revives a finished instance: clear a pending ARCHIVE.
        let signal_name = Name::with_signal(
            Some(workflow.to_string()),
            Some(instance.to_string()),
            SignalAction::Archive.to_string(),
        )
        .signal_token_name();
        let deletes = ctx.client.query_prefix(&signal_name).await?;

        ctx.client.modify(event_tokens, deletes).await?;
        return Ok(format!(
            "poisoned workflow {workflow} instance {instance} roots {roots:?}\n"
        ));
    }

    // Build a fresh instance holding only the poisoned subgraph.
    let mut analyzer = match ctx.args.instance.as_deref() {
        Some(instance) => Analyzer::from_store(ctx.store.as_ref(), workflow, instance)?,
        None => {
            let parser = parser(ctx)?;
            let instance = SystemClock.epoch_ms().to_string();
            Analyzer::from_parser(parser.as_ref(), workflow, &instance)?
        }
    };
    if analyzer.job_names().is_empty() {
        return Ok(format!("workflow {workflow} not found\n"));
    }
    analyzer.clear_job_histories();
    analyzer.poison(&roots)?;
    let new_instance = SystemClock.epoch_ms().to_string();
    analyzer.change_instance(&new_instance);
    let tokens = analyzer.tokens()?;
    ctx.client.modify(tokens, vec![]).await?;
    let prefix = Name::with_instance(workflow, &new_instance).instance_prefix();
    Ok(format!(
        "poisoned workflow {workflow} roots {roots:?}.  Tokens of the new instance are \
         under {prefix}\n"
    ))
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

async fn modify_signal(ctx: &Ctx, action: SignalAction, add: bool) -> anyhow::Result<String> {
    if ctx.args.workflow.is_none() && ctx.args.instance.is_some() {
        bail!("workflow must be provided if instance is set");
    }
    let scope = match (&ctx.args.workflow, &ctx.args.instance) {
        (Some(workflow), Some(instance)) => format!("workflow {workflow} instance {instance}"),
        (Some(workflow), None) => format!("all instances of workflow {workflow}"),
        _ => "all workflows".to_string(),
    };
    let verb = if add { "" } else { "UN" };
    if !confirmed(ctx, &format!("{verb}{action} {scope}")) {
        return Ok(String::new());
    }

    let mut signaller = signaller(ctx).await?;
    if add && signaller.is_signal_present(action) {
        return Ok(format!("{action} has been already set.  Not changing anything this time\n"));
    }
    if !add && !signaller.is_signal_present(action) {
        return Ok(format!(
            "{action} has been already removed.  Not changing anything this time\n"
        ));
    }
    let name = Name::with_signal(
        ctx.args.workflow.clone(),
        ctx.args.instance.clone(),
        action.to_string(),
    )
    .signal_token_name();
    if add {
        signaller.set_action(action, SystemClock.epoch_secs()).await?;
        Ok(format!("set {action}.  Its token is {name}\n"))
    } else {
        signaller.remove_action(action).await?;
        Ok(format!("removed {action} from {name}\n"))
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// Schedules correspond when everything but the next run time matches;
/// such schedules are left alone by reschedule.
fn corresponds(
    old: &pb_core::SchedulePayload,
    new: &pb_core::SchedulePayload,
) -> bool {
    old.workflow == new.workflow
        && old.recurrence_seconds == new.recurrence_seconds
        && old.overrun_policy == new.overrun_policy
        && old.parser_params == new.parser_params
        && old.emails == new.emails
        && old.max_running_instances == new.max_running_instances
}

async fn reschedule(ctx: &Ctx) -> anyhow::Result<String> {
    let parser = parser(ctx)?;
    let known = parser.workflow_names();
    if let Some(workflow) = &ctx.args.workflow {
        if !known.contains(workflow) {
            return Ok(format!("workflow {workflow} not found\n"));
        }
    }
    let workflows = match &ctx.args.workflow {
        Some(workflow) => vec![workflow.clone()],
        None => known,
    };
    if workflows.is_empty() {
        return Ok("no workflows found\n".to_string());
    }
    if !confirmed(ctx, &format!("reschedule workflows {workflows:?}")) {
        return Ok(String::new());
    }

    let mut updates = Vec::new();
    let mut rescheduled = Vec::new();
    for workflow in &workflows {
        let Some(mut new_token) = parser.schedule_token(workflow)? else {
            continue;
        };
        let name = Name::with_workflow(workflow).workflow_schedule_token_name();
        let old_tokens = ctx.client.query_prefix(&name).await?;
        let old_token = old_tokens.iter().find(|t| t.name == name);
        if let Some(old_token) = old_token {
            new_token.version = old_token.version;
            let old_schedule = TokenPayload::schedule(old_token)?;
            let new_schedule = TokenPayload::schedule(&new_token)?;
            if corresponds(&old_schedule, &new_schedule) {
                continue;
            }
        }
        rescheduled.push(workflow.clone());
        updates.push(new_token);
    }
    if !updates.is_empty() {
        ctx.client.modify(updates, vec![]).await?;
    }
    Ok(format!("rescheduled workflows {rescheduled:?}\n"))
}

async fn unschedule(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let name = Name::with_workflow(workflow).workflow_schedule_token_name();
    let tokens = ctx.client.query_prefix(&name).await?;
    let Some(token) = tokens.into_iter().find(|t| t.name == name) else {
        return Ok(format!("schedule for workflow {workflow} not found\n"));
    };
    if !confirmed(ctx, &format!("remove schedule for workflow {workflow}")) {
        return Ok(String::new());
    }
    ctx.client.modify(vec![], vec![token]).await?;
    Ok(format!("removed schedule for workflow {workflow}\n"))
}

// ---------------------------------------------------------------------------
// Reload / disable / enable
// ---------------------------------------------------------------------------

const RELOAD_LEASE_TIME_SEC: i64 = 5 * 60;

async fn unown_tokens(ctx: &Ctx, mut tokens: Vec<Token>) -> anyhow::Result<()> {
    if tokens.is_empty() {
        return Ok(());
    }
    for token in &mut tokens {
        token.unown();
    }
    ctx.client.modify(tokens, vec![]).await?;
    Ok(())
}

/// Own the named jobs (or every job of the instance) for the duration of a
/// reload.
async fn own_job_tokens(
    ctx: &Ctx,
    workflow: &str,
    instance: &str,
    jobs: &Option<Vec<String>>,
) -> anyhow::Result<Vec<Token>> {
    let expiration = SystemClock.epoch_secs() + RELOAD_LEASE_TIME_SEC;
    match jobs {
        Some(jobs) => {
            let mut owned = Vec::new();
            for job in jobs {
                let mut token = None;
                for state in [JobState::Runnable, JobState::Waiting] {
                    let mut name = Name::with_instance(workflow, instance);
                    name.job_state = Some(state);
                    name.job = Some(job.clone());
                    let expected = name.job_token_name();
                    let claimed = ctx
                        .client
                        .query_and_own(Query::with_max(expected.clone(), 1), "workflow_util", expiration)
                        .await?;
                    if let Some(claimed) = claimed.into_iter().find(|t| t.name == expected) {
                        token = Some(claimed);
                        break;
                    }
                }
                match token {
                    Some(token) => owned.push(token),
                    None => {
                        unown_tokens(ctx, owned).await?;
                        bail!(
                            "job {job} in workflow {workflow} instance {instance} either not \
                             found or already owned"
                        );
                    }
                }
            }
            Ok(owned)
        }
        None => {
            let prefix = Name::with_instance(workflow, instance).job_prefix();
            let counts = ctx.client.group(&prefix, Some("/")).await?;
            let expected: i64 = counts.values().sum();
            if expected == 0 {
                bail!("workflow {workflow} instance {instance} not found or already archived");
            }
            let owned = ctx
                .client
                .query_and_own(Query::prefix(prefix.clone()), "workflow_util", expiration)
                .await?;
            if (owned.len() as i64) < expected {
                let claimed = owned.len();
                unown_tokens(ctx, owned).await?;
                bail!(
                    "only {claimed} out of {expected} job tokens in workflow {workflow} \
                     instance {instance} could be claimed"
                );
            }
            Ok(owned)
        }
    }
}

async fn reload(ctx: &Ctx) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let jobs = ctx
        .args
        .jobs
        .as_deref()
        .map(|list| list.split(',').map(str::to_string).collect::<Vec<_>>());
    let parser = parser(ctx)?;
    if !parser.workflow_names().contains(&workflow.to_string()) {
        return Ok(format!("workflow {workflow} not found\n"));
    }

    let mut owned = own_job_tokens(ctx, workflow, instance, &jobs).await?;

    // Fresh definitions keyed by job name.
    let mut new_jobs = std::collections::BTreeMap::new();
    let mut new_priorities = std::collections::BTreeMap::new();
    for token in parser.workflow_tokens(workflow, "reload")? {
        let name = Name::from_job_token_name(&token.name);
        if let Some(job) = name.job {
            new_priorities.insert(job.clone(), token.priority);
            new_jobs.insert(job, TokenPayload::job(&token)?);
        }
    }

    let mut missing = Vec::new();
    for token in &owned {
        let name = Name::from_job_token_name(&token.name);
        if let Some(job) = &name.job {
            if !new_jobs.contains_key(job) {
                missing.push(job.clone());
            }
        }
    }
    if !missing.is_empty() {
        unown_tokens(ctx, owned).await?;
        return Ok(format!("jobs {missing:?} not found in workflow {workflow}\n"));
    }

    for token in &mut owned {
        let name = Name::from_job_token_name(&token.name);
        let Some(job_name) = name.job else { continue };
        let Some(new_job) = new_jobs.get(&job_name) else { continue };
        let mut job = TokenPayload::job(token)?;
        job.reload(new_job);
        token.data = Some(job.encode()?);
        if let Some(priority) = new_priorities.get(&job_name) {
            token.priority = *priority;
        }
        token.unown();
    }
    let count = owned.len();
    ctx.client.modify(owned, vec![]).await?;
    Ok(format!(
        "reloaded {count} job(s) in workflow {workflow} instance {instance}\n"
    ))
}

async fn alter(ctx: &Ctx, disable: bool) -> anyhow::Result<String> {
    let workflow = require_workflow(ctx)?;
    let instance = require_instance(ctx)?;
    let jobs = job_list(ctx)?;
    let mode = if disable { "disable" } else { "enable" };
    if !confirmed(
        ctx,
        &format!("{mode} {} jobs in workflow {workflow} instance {instance}", jobs.len()),
    ) {
        return Ok(String::new());
    }

    for tries in 1..=MAX_TRIES {
        let prefix = Name::with_instance(workflow, instance).job_prefix();
        let tokens = ctx.client.query_prefix(&prefix).await?;
        let mut selected = Vec::new();
        for token in tokens {
            let name = Name::from_job_token_name(&token.name);
            if name.job.as_deref().is_some_and(|j| jobs.contains(&j.to_string())) {
                selected.push(token);
            }
        }
        if selected.len() < jobs.len() {
            bail!(
                "job(s) not found in the master.  Note that only jobs of a running workflow \
                 can be {mode}d"
            );
        }
        // Leave jobs mid-execution alone.
        let now = SystemClock.epoch_secs();
        if selected.iter().any(|t| t.is_owned(now - 1)) {
            bail!("some jobs are owned by a worker; try again later");
        }
        let mut updates = Vec::new();
        for mut token in selected {
            let mut job = TokenPayload::job(&token)?;
            job.disabled = disable;
            token.data = Some(job.encode()?);
            updates.push(token);
        }
        let count = updates.len();
        match ctx.client.modify(updates, vec![]).await {
            Ok(_) => return Ok(format!("{mode}d {count} job(s) in {tries} tries\n")),
            Err(err) if err.is_version_conflict() => continue,
            Err(err) => return Err(err.into()),
        }
    }
    bail!("failed to {mode} job(s) in {MAX_TRIES} tries")
}

// ---------------------------------------------------------------------------
// Cleanup / cache
// ---------------------------------------------------------------------------

async fn cleanup(ctx: &Ctx) -> anyhow::Result<String> {
    if ctx.args.age_days < 7 {
        bail!("age of instances to remove must be at least 7 days");
    }
    let cutoff = SystemClock.epoch_secs() - ctx.args.age_days * 24 * 60 * 60;

    // Enumerate archived instances from the archived relation.
    let mut instances: Vec<(String, String)> = Vec::new();
    for name in ctx
        .store
        .read_archived_token_names(&NameFilter::prefix("/workflow/"))?
    {
        let parsed = Name::from_instance_prefix(&name);
        if let (Some(workflow), Some(instance)) = (parsed.workflow, parsed.instance) {
            let pair = (workflow, instance);
            if !instances.contains(&pair) {
                instances.push(pair);
            }
        }
    }

    let mut tokens_to_delete = Vec::new();
    let mut directories_to_delete = Vec::new();
    for (workflow, instance) in instances {
        let status = ctx.status.instance_status(&workflow, &instance)?;
        if !matches!(
            status,
            Some(InstanceStatus::Success) | Some(InstanceStatus::Failure)
        ) {
            continue;
        }
        let prefix = Name::with_instance(&workflow, &instance).instance_prefix();
        let tokens = ctx.store.read_archived_tokens(&NameFilter::prefix(&prefix))?;
        let end_time = tokens
            .iter()
            .filter_map(|t| TokenPayload::job(t).ok())
            .filter_map(|job| job.history.last().and_then(|r| r.end_time))
            .max();
        if end_time.is_some_and(|end| end < cutoff) {
            directories_to_delete.push(
                ctx.config
                    .local_logs_dir
                    .join(&workflow)
                    .join(&instance),
            );
            tokens_to_delete.extend(tokens);
        }
    }

    if tokens_to_delete.is_empty() {
        return Ok("no tokens need to be cleaned up\nremoved 0 token(s)\n".to_string());
    }
    println!("removing tokens:");
    for token in &tokens_to_delete {
        println!("\t{}", token.name);
    }
    if !confirmed(
        ctx,
        &format!(
            "remove {} tokens and {} directories",
            tokens_to_delete.len(),
            directories_to_delete.len()
        ),
    ) {
        return Ok("removed 0 token(s)\n".to_string());
    }
    ctx.store.delete_archived_tokens(&tokens_to_delete)?;
    for directory in &directories_to_delete {
        let _ = std::fs::remove_dir_all(directory);
    }
    Ok(format!(
        "removed {} token(s) and {} directory(ies)\n",
        tokens_to_delete.len(),
        directories_to_delete.len()
    ))
}

async fn rebuild_cache(ctx: &Ctx) -> anyhow::Result<String> {
    let cache_size = ctx
        .store
        .read_cached_data_names(&NameFilter::all())?
        .len();
    if !confirmed(ctx, &format!("rebuild cache with {cache_size} data items")) {
        return Ok(String::new());
    }
    let rebuilt = ctx.status.rebuild_cache()?;
    Ok(format!("rebuilt data cache.  It now has {rebuilt} data items\n"))
}
