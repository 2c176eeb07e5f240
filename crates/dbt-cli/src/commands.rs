// SPDX-License-Identifier: MIT OR Apache-2.0
//! The dbt commands: verified tool runs, catalog display, and purge.

use anyhow::{bail, Context, Result};
use dbt_auth::{HeaderSource, ProfileAuthorizer};
use dbt_config::{AuthDescriptor, DbtConfig, DbtPaths, ServerProfile};
use dbt_core::ToolVersion;
use dbt_purge::{PurgeEngine, RetentionPolicy};
use dbt_repo::RepoClient;
use dbt_runner::{SelfUpgrader, ToolRunner};
use dbt_transport::{ProgressOptions, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One resolved CLI invocation: selected profile, auth, and repo client.
pub struct Session {
    paths: DbtPaths,
    server_name: String,
    profile: ServerProfile,
    headers: Arc<dyn HeaderSource>,
    progress: ProgressOptions,
}

impl Session {
    /// Load the config, pick the server profile, and wire up auth.
    pub async fn establish(server_flag: Option<&str>, progress: bool) -> Result<Self> {
        let paths = DbtPaths::new(home_dir()?);
        let config_file = paths.config_file();
        let config = DbtConfig::load(&config_file)
            .with_context(|| format!("loading {}", config_file.display()))?;

        let env_server = std::env::var("DBT_SERVER").ok();
        let (server_name, profile) = config
            .select_server(server_flag, env_server.as_deref())
            .context("selecting server")?;
        let server_name = server_name.to_string();
        let profile = profile.clone();

        let headers = build_header_source(&profile).await?;

        Ok(Self {
            paths,
            server_name,
            profile,
            headers,
            progress: ProgressOptions { enabled: progress },
        })
    }

    fn transport(&self) -> Transport {
        Transport::new(Arc::clone(&self.headers), self.progress)
    }

    fn repo(&self) -> RepoClient {
        RepoClient::new(
            self.transport(),
            self.profile.repository.clone(),
            self.profile.tools_repository.clone(),
            self.profile.truststore.clone(),
        )
    }

    // -- run ------------------------------------------------------------

    /// Resolve, verify, and execute a tool; terminal on success.
    pub async fn run_tool(
        &self,
        tool: &str,
        args: &[String],
        requested: Option<ToolVersion>,
        offline: bool,
    ) -> Result<()> {
        if !offline {
            self.upgrade_check().await;
        }

        let runner = ToolRunner::new(
            self.repo(),
            self.paths.clone(),
            self.server_name.clone(),
            self.profile.clone(),
        );
        let prepared = runner.prepare(tool, requested, offline).await?;

        // Replaces the process on unix; elsewhere the child's exit code
        // becomes ours.
        let code = dbt_runner::execute(&prepared, args)?;
        std::process::exit(code);
    }

    /// Self-upgrade precondition: replace a stale dbt before running tools.
    ///
    /// Failures are logged, not fatal; an unreachable release listing must
    /// not stop verified tool execution.
    async fn upgrade_check(&self) {
        let upgrader = SelfUpgrader::new(self.repo());
        let Ok(current_exe) = std::env::current_exe() else {
            return;
        };
        match upgrader.is_current(&current_exe).await {
            Ok(true) => {}
            Ok(false) => match upgrader.upgrade_in_place(&current_exe).await {
                Ok(()) => eprintln!(
                    "dbt: upgraded in place; the new version takes effect on the next run"
                ),
                Err(e) => warn!(error = %e, "self-upgrade failed"),
            },
            Err(e) => warn!(error = %e, "self-upgrade check failed"),
        }
    }

    // -- catalog --------------------------------------------------------

    /// `dbt catalog list [--versions]`.
    pub async fn catalog_list(&self, with_versions: bool) -> Result<()> {
        let entries = self.repo().fetch_catalog().await?;
        print!("{}", crate::format::catalog_table(&entries, with_versions));
        Ok(())
    }

    /// `dbt catalog describe <tool>`.
    pub async fn catalog_describe(&self, tool: &str) -> Result<()> {
        let repo = self.repo();
        let Some(latest) = repo.find_latest_version(tool).await? else {
            bail!("tool '{tool}' is not in the repository");
        };

        let description = repo.fetch_tool_description(tool, &latest).await.ok();
        let mut versions = repo.fetch_tool_versions(tool).await?;
        versions.sort();
        print!(
            "{}",
            crate::format::describe_block(tool, &latest, description.as_deref(), &versions)
        );
        Ok(())
    }

    // -- purge ----------------------------------------------------------

    /// `dbt purge <tool> [--all] [--older-than] [--keep] [--dry-run] [-y]`.
    pub async fn purge(
        &self,
        tool: &str,
        all: bool,
        older_than: Option<Duration>,
        keep: usize,
        dry_run: bool,
        yes: bool,
    ) -> Result<()> {
        let engine = PurgeEngine::new(self.transport(), self.server_base()?);
        let policy = RetentionPolicy { older_than, keep };
        let plan = engine.plan(tool, policy, all).await?;

        if plan.deletions.is_empty() {
            println!("nothing to purge for '{tool}'");
            return Ok(());
        }

        print!("{}", crate::format::purge_summary(&plan));

        if dry_run {
            println!("dry run; nothing deleted");
            return Ok(());
        }

        if !yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!("delete {} version(s)?", plan.deletions.len()))
                .default(false)
                .interact()
                .context("confirmation prompt")?;
            if !confirmed {
                bail!("purge aborted");
            }
        }

        let deleted = engine.execute(&plan).await?;
        println!("deleted {} version(s)", deleted.len());
        Ok(())
    }

    /// The server base URL (scheme + host + port) the JSON API lives under.
    fn server_base(&self) -> Result<String> {
        let url = url::Url::parse(&self.profile.tools_repository)
            .with_context(|| format!("parsing {}", self.profile.tools_repository))?;
        Ok(url.origin().ascii_serialization())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn build_header_source(profile: &ServerProfile) -> Result<Arc<dyn HeaderSource>> {
    let authorizer = ProfileAuthorizer::new(profile);

    let authorizer = match &profile.auth {
        Some(AuthDescriptor::Oidc {
            issuer,
            audience,
            client_id,
            client_secret,
            username,
            connector_id,
        }) => {
            let exchange = dbt_oidc::ExchangeClient::new(
                dbt_oidc::ExchangeConfig {
                    issuer: issuer.clone(),
                    audience: audience.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    username: username.clone(),
                    connector_id: connector_id.clone(),
                },
                oidc_signer().await?,
            )
            .context("building token exchange client")?;
            authorizer.with_token_provider(Arc::new(exchange))
        }
        _ => authorizer,
    };

    Ok(Arc::new(authorizer))
}

/// The exchange signs with whatever key the agent offers first; the issuer
/// decides whether that key authenticates the subject.
#[cfg(unix)]
async fn oidc_signer() -> Result<Arc<dyn dbt_auth::JwtSigner>> {
    let signer = dbt_auth::agent::AgentSigner::from_env_first_identity()
        .await
        .context("binding to the ssh agent")?;
    Ok(Arc::new(signer))
}

#[cfg(not(unix))]
async fn oidc_signer() -> Result<Arc<dyn dbt_auth::JwtSigner>> {
    bail!("oidc auth requires an ssh agent, which needs a unix host")
}

fn home_dir() -> Result<PathBuf> {
    #[cfg(unix)]
    let var = "HOME";
    #[cfg(not(unix))]
    let var = "USERPROFILE";

    std::env::var_os(var)
        .map(PathBuf::from)
        .with_context(|| format!("{var} is not set"))
}
