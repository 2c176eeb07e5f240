// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbt_cli::commands;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "dbt",
    version = dbt_core::version(),
    about = "Fetch, verify, and run signed tools from a dbt repository"
)]
struct Cli {
    /// Run without consulting the repository; requires a local copy.
    #[arg(long, global = true)]
    offline: bool,

    /// Server profile to use (falls back to DBT_SERVER, then the default).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Run a specific tool version instead of the latest.
    #[arg(long, global = true)]
    tool_version: Option<String>,

    /// Show download progress.
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the tools published in the repository.
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },

    /// Delete old tool versions from the repository.
    Purge {
        /// Tool whose versions should be purged.
        tool: String,

        /// Delete every version of the tool.
        #[arg(long)]
        all: bool,

        /// Delete versions older than this (e.g. 45d, 2w).
        #[arg(long, value_parser = dbt_core::parse_duration)]
        older_than: Option<std::time::Duration>,

        /// Always keep this many of the newest versions.
        #[arg(long, default_value_t = 0)]
        keep: usize,

        /// Show what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Anything else is a tool name followed by its arguments.
    #[command(external_subcommand)]
    Tool(Vec<String>),
}

#[derive(Subcommand, Debug)]
enum CatalogCommands {
    /// List every tool with its description.
    List {
        /// Also list each tool's published versions.
        #[arg(long)]
        versions: bool,
    },

    /// Show one tool in detail.
    Describe {
        /// The tool to describe.
        tool: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = dispatch(cli).await {
        eprintln!("dbt: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

fn init_tracing() {
    // DBT_DEBUG=true turns on the verbose trace (token exchange and
    // friends) without touching RUST_LOG.
    let debug = std::env::var("DBT_DEBUG").is_ok_and(|v| v == "true");
    let filter = if debug {
        EnvFilter::new("dbt=debug,dbt_oidc=debug,dbt_auth=debug,dbt_repo=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let session = commands::Session::establish(
        cli.server.as_deref(),
        cli.progress,
    )
    .await?;

    match cli.command {
        Commands::Catalog { command } => match command {
            CatalogCommands::List { versions } => session.catalog_list(versions).await,
            CatalogCommands::Describe { tool } => session.catalog_describe(&tool).await,
        },

        Commands::Purge {
            tool,
            all,
            older_than,
            keep,
            dry_run,
            yes,
        } => {
            session
                .purge(&tool, all, older_than, keep, dry_run, yes)
                .await
        }

        Commands::Tool(argv) => {
            let (tool, args) = argv
                .split_first()
                .context("no tool name given; try `dbt catalog list`")?;
            let requested = cli
                .tool_version
                .as_deref()
                .map(str::parse)
                .transpose()
                .context("invalid --tool-version")?;
            session.run_tool(tool, args, requested, cli.offline).await
        }
    }
}
