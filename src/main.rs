// Copyright 2026 Vigil Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use vigil::cli;
use vigil::cli::watch_cmd::WatchAction;

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil — watch dynamic web pages and act when they change",
    version,
    after_help = "Run 'vigil <command> --help' for details on each command."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve content for a URL once and write it to stdout
    Fetch {
        #[command(flatten)]
        common: cli::CommonArgs,
        #[command(flatten)]
        fetch: cli::FetchArgs,
    },
    /// Watch URL(s) and take an action when the criteria is met
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },
    /// Check environment and diagnose issues
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "vigil=debug"
    } else {
        "vigil=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().unwrap()),
        )
        .init();

    match cli.command {
        Commands::Fetch { common, fetch } => cli::fetch_cmd::run(&common, &fetch).await,
        Commands::Watch { action } => cli::watch_cmd::run(&action).await,
        Commands::Doctor => cli::doctor::run().await,
    }
}
