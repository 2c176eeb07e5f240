// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use dbt_reposerver::ServerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbt-reposerver", version, about = "dbt artifact repository server")]
struct Args {
    /// Config file (JSON).
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Listen address; overrides the config file.
    #[arg(long)]
    address: Option<String>,

    /// Listen port; overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Root of the served artifact tree; overrides the config file.
    #[arg(long)]
    server_root: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("dbt=debug,dbt_reposerver=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let server_root = args
                .server_root
                .clone()
                .context("either -f <config> or --server-root is required")?;
            serde_json::from_value(serde_json::json!({ "serverRoot": server_root }))
                .context("default config")?
        }
    };

    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(server_root) = args.server_root {
        config.server_root = server_root;
    }

    dbt_reposerver::run(config).await.context("serve")
}
