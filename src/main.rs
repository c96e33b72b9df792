// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, McpCommands};
use troupe_mcp::{stdio_child_factory, PersistentProxy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = troupe_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => troupe_gateway::serve(config).await,

        Commands::Replay {
            file,
            turn_timeout,
            agent,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut session = troupe_replay::session_from_config(&config)?;
            if let Some(agent) = agent {
                session.switch_agent(&agent)?;
            }
            let outcome = troupe_replay::run(
                &mut session,
                &content,
                Duration::from_secs(turn_timeout),
                |reply| println!("{reply}"),
            )
            .await?;
            tracing::info!(
                turns = outcome.turns,
                timed_out = outcome.timed_out,
                "replay finished"
            );
            Ok(())
        }

        Commands::Mcp { command } => match command {
            McpCommands::Serve { tools } => {
                let policy = Arc::new(troupe_tools::PathPolicy::new(
                    &config.tools.workspace,
                    &config.tools.output,
                ));
                let mailbox = Arc::new(troupe_mail::Mailbox::new());
                let registry = Arc::new(troupe_tools::ToolRegistry::new());
                troupe_tools::register_builtin(&registry, policy, mailbox)?;

                let exposed: Option<HashSet<String>> = tools.map(|list| {
                    list.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                });
                troupe_mcp::serve_stdio(registry, exposed).await
            }
            McpCommands::Proxy {
                restart_delay,
                child,
            } => {
                let (command, args) = child
                    .split_first()
                    .context("proxy requires a child command")?;
                let proxy = Arc::new(PersistentProxy::new(
                    stdio_child_factory(
                        command.clone(),
                        args.to_vec(),
                        Duration::from_secs(config.gateway.turn_timeout_secs),
                    ),
                    Duration::from_secs(restart_delay),
                ));
                proxy.start().await?;
                proxy.run_stdio().await
            }
        },

        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
    }
}

/// Initialize tracing from LOG_LEVEL, falling back to RUST_LOG, then to
/// `info` (or `debug` with --verbose).  Credentials never appear in spans,
/// so plain stderr output is safe.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = std::env::var("LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}
