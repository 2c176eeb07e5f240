// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verified tool execution.
//!
//! The runner resolves a tool to a local, fully verified binary
//! ([`ToolRunner::prepare`]) and then replaces the current process with it
//! ([`execute`]). Every path to execution (offline, cached, or freshly
//! downloaded) goes through the same checksum-plus-signature gate; there is
//! no way to run an unverified binary through this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod upgrade;

pub use upgrade::SelfUpgrader;

use dbt_config::{DbtPaths, ServerProfile, DEFAULT_SERVER};
use dbt_repo::{sidecar, RepoClient, RepoError, CHECKSUM_EXT, SIGNATURE_EXT};
use dbt_core::ToolVersion;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while preparing or executing a tool.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A repository operation failed.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// The tool is in neither the repository nor the local tool directory.
    #[error("tool '{tool}' is not in the repository and no local copy exists")]
    ToolNotFound {
        /// The requested tool.
        tool: String,
    },

    /// Offline mode was requested but there is no local copy.
    #[error("offline mode: no local copy of '{tool}' at {path}")]
    NoLocalCopy {
        /// The requested tool.
        tool: String,
        /// Where the binary was expected.
        path: PathBuf,
    },

    /// A binary is present but one of its sidecars is not.
    ///
    /// This is an integrity fault, never a reason to execute unverified.
    #[error("integrity fault: {path} is missing its .{ext} sidecar")]
    MissingSidecar {
        /// The binary path.
        path: PathBuf,
        /// The missing sidecar extension.
        ext: String,
    },

    /// A local file operation failed.
    #[error("file operation on {path} failed")]
    Io {
        /// The local path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Handing control to the tool failed.
    #[error("failed to execute {path}")]
    Exec {
        /// The binary path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// PreparedTool
// ---------------------------------------------------------------------------

/// A tool that has passed both verification gates and is ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTool {
    /// Path of the verified binary.
    pub path: PathBuf,
    /// `DBT_*` environment exported to the child.
    pub env: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// ToolRunner
// ---------------------------------------------------------------------------

/// Resolves, verifies, and stages tools for one server profile.
pub struct ToolRunner {
    repo: RepoClient,
    paths: DbtPaths,
    server_name: String,
    profile: ServerProfile,
}

impl ToolRunner {
    /// Create a runner for a server profile.
    pub fn new(
        repo: RepoClient,
        paths: DbtPaths,
        server_name: impl Into<String>,
        profile: ServerProfile,
    ) -> Self {
        Self {
            repo,
            paths,
            server_name: server_name.into(),
            profile,
        }
    }

    /// Resolve `tool` to a verified local binary.
    ///
    /// `requested` pins a version; `None` means latest. With `offline` set,
    /// only the local copy is considered. When the repository does not list
    /// the tool but a local copy exists, the runner degrades to offline mode
    /// rather than failing.
    pub async fn prepare(
        &self,
        tool: &str,
        requested: Option<ToolVersion>,
        offline: bool,
    ) -> Result<PreparedTool, RunnerError> {
        let tool_dir = self.paths.tools_dir(&self.server_name);
        tokio::fs::create_dir_all(&tool_dir)
            .await
            .map_err(|source| RunnerError::Io {
                path: tool_dir.clone(),
                source,
            })?;
        let local = tool_dir.join(tool);

        if offline {
            if !local.exists() {
                return Err(RunnerError::NoLocalCopy {
                    tool: tool.into(),
                    path: local,
                });
            }
            self.verify_local(&local).await?;
            return Ok(self.prepared(local));
        }

        let target = match self.repo.find_latest_version(tool).await? {
            Some(latest) => requested.unwrap_or(latest),
            None if local.exists() => {
                warn!(tool, "not in repository; degrading to local copy");
                self.verify_local(&local).await?;
                return Ok(self.prepared(local));
            }
            None => {
                return Err(RunnerError::ToolNotFound { tool: tool.into() });
            }
        };

        let url =
            self.repo
                .artifact_url(tool, &target, dbt_core::platform::os(), dbt_core::platform::arch());

        if local.exists() && self.repo.verify_file_version(&url, &local).await? {
            debug!(tool, version = %target, "local copy is current");
        } else {
            info!(tool, version = %target, "fetching");
            self.repo.fetch_artifact_triple(&url, &local).await?;
        }

        self.verify_local(&local).await?;
        Ok(self.prepared(local))
    }

    /// Both verification gates: checksum sidecar, then detached signature.
    async fn verify_local(&self, local: &Path) -> Result<(), RunnerError> {
        let checksum_file = sidecar(local, CHECKSUM_EXT);
        let signature_file = sidecar(local, SIGNATURE_EXT);
        for (file, ext) in [(&checksum_file, CHECKSUM_EXT), (&signature_file, SIGNATURE_EXT)] {
            if !file.exists() {
                return Err(RunnerError::MissingSidecar {
                    path: local.to_path_buf(),
                    ext: ext.into(),
                });
            }
        }

        let expected =
            std::fs::read_to_string(&checksum_file).map_err(|source| RunnerError::Io {
                path: checksum_file.clone(),
                source,
            })?;
        RepoClient::verify_file_checksum(local, &expected)?;

        self.ensure_truststore().await?;
        RepoClient::verify_file_signature(&self.paths.truststore(), local)?;
        debug!(path = %local.display(), "checksum and signature verified");
        Ok(())
    }

    /// Fetch the trust store on first use; verification never mutates it.
    async fn ensure_truststore(&self) -> Result<(), RunnerError> {
        let dest = self.paths.truststore();
        if !dest.exists() {
            info!(dest = %dest.display(), "fetching trust store");
            self.repo.fetch_truststore(&dest).await?;
        }
        Ok(())
    }

    fn prepared(&self, path: PathBuf) -> PreparedTool {
        let mut env = vec![
            ("DBT_REPO".to_string(), self.profile.repository.clone()),
            (
                "DBT_TOOLS_REPO".to_string(),
                self.profile.tools_repository.clone(),
            ),
            ("DBT_TRUSTSTORE".to_string(), self.profile.truststore.clone()),
        ];
        if self.server_name != DEFAULT_SERVER {
            env.push(("DBT_SERVER".to_string(), self.server_name.clone()));
        }
        PreparedTool { path, env }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Hand control to a prepared tool, argv preserved.
///
/// On unix the current process image is replaced and this function only
/// returns on failure. Elsewhere the child runs with inherited stdio and its
/// exit code is returned for the caller to propagate.
pub fn execute(prepared: &PreparedTool, args: &[String]) -> Result<i32, RunnerError> {
    let mut command = std::process::Command::new(&prepared.path);
    command.args(args);
    for (key, value) in &prepared.env {
        command.env(key, value);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // exec only returns on failure.
        let source = command.exec();
        Err(RunnerError::Exec {
            path: prepared.path.clone(),
            source,
        })
    }

    #[cfg(not(unix))]
    {
        let status = command.status().map_err(|source| RunnerError::Exec {
            path: prepared.path.clone(),
            source,
        })?;
        Ok(status.code().unwrap_or(1))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
