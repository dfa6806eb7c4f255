// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-level administration: cat, ls, rm, update.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use pb_core::{PinballConfig, Token};
use pb_master::MasterClient;
use pinball::output::{confirm, token_to_str};
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum TokenCommand {
    /// Show token content.
    Cat,
    /// List token groups one hierarchy level down.
    Ls,
    /// Remove tokens.
    Rm,
    /// Insert or update a token.
    Update,
}

#[derive(Parser)]
#[command(name = "pinball_util", about = "Interact with the Pinball master")]
struct Args {
    command: TokenCommand,

    /// Token name prefix (cat, ls, rm).
    prefix: Option<String>,

    /// Configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master hostname.
    #[arg(short = 's', long)]
    host: Option<String>,

    /// Master port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Match every token under the prefix instead of the exact name.
    #[arg(short, long)]
    recursive: bool,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    force: bool,

    /// Token name (update).
    #[arg(short, long)]
    name: Option<String>,

    /// Expected token version (update of an existing token).
    #[arg(short = 'v', long)]
    version: Option<i64>,

    /// Token owner (update); requires --expiration.
    #[arg(short, long)]
    owner: Option<String>,

    /// Ownership expiration, seconds since the epoch (update).
    #[arg(short = 't', long)]
    expiration: Option<i64>,

    /// Token payload (update).
    #[arg(short, long)]
    data: Option<String>,

    /// Token priority (update).
    #[arg(short = 'i', long, default_value_t = 0.0)]
    priority: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pinball::init_tracing();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PinballConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PinballConfig::default(),
    };
    let client = pinball::remote_client(&config, args.host.as_deref(), args.port);

    let output = match args.command {
        TokenCommand::Cat => cat(&client, &args).await?,
        TokenCommand::Ls => ls(&client, &args).await?,
        TokenCommand::Rm => rm(&client, &args).await?,
        TokenCommand::Update => update(&client, &args).await?,
    };
    print!("{output}");
    Ok(())
}

fn require_prefix(args: &Args) -> anyhow::Result<&str> {
    args.prefix
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("{} takes a token name prefix argument", command_name(args)))
}

fn command_name(args: &Args) -> &'static str {
    match args.command {
        TokenCommand::Cat => "cat",
        TokenCommand::Ls => "ls",
        TokenCommand::Rm => "rm",
        TokenCommand::Update => "update",
    }
}

/// Tokens under the prefix; without `-r`, only an exact name match.
async fn get_tokens(
    client: &impl MasterClient,
    prefix: &str,
    recursive: bool,
) -> anyhow::Result<Vec<Token>> {
    let tokens = client.query_prefix(prefix).await?;
    Ok(tokens
        .into_iter()
        .filter(|t| recursive || t.name == prefix)
        .collect())
}

async fn cat(client: &impl MasterClient, args: &Args) -> anyhow::Result<String> {
    let prefix = require_prefix(args)?;
    let tokens = get_tokens(client, prefix, args.recursive).await?;
    let mut output = format!("total {}\n", tokens.len());
    for token in &tokens {
        output.push_str(&token_to_str(token));
        output.push('\n');
    }
    Ok(output)
}

async fn ls(client: &impl MasterClient, args: &Args) -> anyhow::Result<String> {
    let prefix = require_prefix(args)?;
    let suffix = if args.recursive { None } else { Some("/") };
    let counts = client.group(prefix, suffix).await?;
    let mut output = format!("total {}\n", counts.len());
    for (group, count) in &counts {
        output.push_str(&format!("{group} [{count} token(s)]\n"));
    }
    Ok(output)
}

async fn rm(client: &impl MasterClient, args: &Args) -> anyhow::Result<String> {
    let prefix = require_prefix(args)?;
    let tokens = get_tokens(client, prefix, args.recursive).await?;
    if tokens.is_empty() {
        return Ok("no tokens found\nremoved 0 token(s)\n".to_string());
    }
    println!("removing:");
    for token in &tokens {
        println!("\t{}", token.name);
    }
    if !args.force && !confirm(&format!("remove {} tokens", tokens.len())) {
        return Ok("removed 0 token(s)\n".to_string());
    }
    let count = tokens.len();
    client.modify(vec![], tokens).await?;
    Ok(format!("removed {count} token(s)\n"))
}

async fn update(client: &impl MasterClient, args: &Args) -> anyhow::Result<String> {
    let Some(name) = &args.name else {
        bail!("update command requires a token name");
    };
    if args.owner.is_some() != args.expiration.is_some() {
        bail!("if either of owner and expiration is set, the other must be set as well");
    }
    let token = Token {
        version: args.version.unwrap_or(0),
        name: name.clone(),
        owner: args.owner.clone(),
        expiration_time: args.expiration,
        priority: args.priority,
        data: args.data.clone(),
    };
    let action = if token.version == 0 { "inserted" } else { "updated" };
    let mut updates = client.modify(vec![token], vec![]).await?;
    let updated = updates.remove(0);
    Ok(format!(
        "{action} {}\nupdated 1 token\n",
        token_to_str(&updated)
    ))
}
