// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token master server, optionally hosting scheduler and worker loops.

use anyhow::Context;
use clap::Parser;
use pb_core::{PinballConfig, SystemClock};
use pb_master::{LocalClient, MasterHandler};
use pb_scheduler::{Scheduler, SchedulerConfig};
use pb_store::SqliteStore;
use pb_workflow::{parser_for, Emailer, LogMailer, StaticParser, Worker, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[derive(Parser)]
#[command(name = "master", about = "Start the Pinball token master")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured master port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Also run the scheduler loop in this process.
    #[arg(long)]
    scheduler: bool,

    /// Also run this many worker loops in this process.
    #[arg(long)]
    workers: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = PinballConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    if let Some(port) = args.port {
        config.master_port = port;
    }

    std::fs::create_dir_all(&config.local_logs_dir)
        .with_context(|| format!("creating logs dir {}", config.local_logs_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&config.local_logs_dir, "master.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    if let Some(parent) = config.store_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating store dir {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::open(&config.store_path, &config.master_name)
            .with_context(|| format!("opening store {}", config.store_path.display()))?,
    );
    let handler = Arc::new(
        MasterHandler::new(Arc::clone(&store), SystemClock).context("loading master state")?,
    );

    let addr = config.master_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr, master = config.master_name, "master listening");

    // Loops hosted in-process talk to the handler directly.
    let client: Arc<dyn pb_master::MasterClient> =
        Arc::new(LocalClient::new(Arc::clone(&handler)));
    let dyn_store: Arc<dyn pb_store::Store> = store;
    let emailer = Arc::new(Emailer::new(Arc::new(LogMailer)));

    if args.scheduler {
        // The default parser resolves workflows registered in-process; a
        // deployment registers its own parser before calling into this
        // binary's library entry points.
        let parser = parser_for(&config)
            .unwrap_or_else(|| {
                tracing::warn!(parser = config.parser, "parser not registered, scheduling nothing");
                Arc::new(StaticParser::new())
            });
        let scheduler = Scheduler::new(
            Arc::clone(&client),
            Arc::clone(&dyn_store),
            parser,
            SystemClock,
            Arc::clone(&emailer),
            SchedulerConfig::from_config(&config),
        );
        tokio::spawn(async move { scheduler.run().await });
    }

    for _ in 0..args.workers.unwrap_or(0) {
        let worker = Worker::new(
            Arc::clone(&client),
            Arc::clone(&dyn_store),
            SystemClock,
            Arc::clone(&emailer),
            WorkerConfig::from_config(&config),
        );
        tokio::spawn(async move { worker.run().await });
    }

    pb_master::serve(listener, handler)
        .await
        .context("serving the master")?;
    Ok(())
}
