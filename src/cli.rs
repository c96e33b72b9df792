// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "troupe",
    about = "Interactive multi-agent orchestrator with tool use, inter-agent mail, and MCP integration",
    version
)]
pub struct Cli {
    /// Path to an explicit config file (otherwise the standard search
    /// locations are merged).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (LOG_LEVEL / RUST_LOG still win).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the WebSocket JSON-RPC gateway.
    Serve,

    /// Run a conversation file headless: one user message per line,
    /// `#` comments and blank lines ignored, `/quit` stops early.
    /// Assistant replies stream to stdout for piping.
    Replay {
        /// The conversation file to drive the session with.
        file: PathBuf,
        /// Per-turn timeout in seconds.
        #[arg(long, default_value_t = 300)]
        turn_timeout: u64,
        /// Agent to address the conversation to (default agent otherwise).
        #[arg(long)]
        agent: Option<String>,
    },

    /// MCP subcommands.
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },

    /// Print the merged configuration and exit.
    ShowConfig,
}

#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// Expose the built-in tools as a stdio MCP server.
    ///
    /// Example host configuration:
    ///
    /// ```json
    /// { "mcpServers": { "troupe": { "command": "troupe", "args": ["mcp", "serve"] } } }
    /// ```
    Serve {
        /// Comma-separated tool names to expose (default: all).
        #[arg(long)]
        tools: Option<String>,
    },

    /// Run the persistent caching proxy around a child MCP server.
    ///
    /// The child is restarted if it exits; `initialize` and `tools/list`
    /// are served from cache while it is down.
    ///
    /// Example: troupe mcp proxy -- my-mcp-server --flag
    Proxy {
        /// Seconds to wait before respawning a dead child.
        #[arg(long, default_value_t = 2)]
        restart_delay: u64,
        /// Child command and arguments.
        #[arg(last = true, required = true)]
        child: Vec<String>,
    },
}
