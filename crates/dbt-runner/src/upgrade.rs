// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-place self-upgrade.
//!
//! dbt compares the running binary's SHA-256 to the digest published for the
//! newest release of its own platform artifact. On mismatch the new binary is
//! downloaded to a scratch path *inside the binary's own directory* (renames
//! across filesystems fail, and `/tmp` is routinely a different mount) and
//! renamed over the running image.

use crate::RunnerError;
use dbt_core::{sha256_hex_file, ToolVersion};
use dbt_repo::{RepoClient, RepoError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Scratch suffix for the downloaded replacement binary.
const SCRATCH_SUFFIX: &str = ".upgrade";

/// Checks and replaces the running dbt binary.
pub struct SelfUpgrader {
    repo: RepoClient,
}

impl SelfUpgrader {
    /// Create an upgrader over the dbt release repository.
    pub fn new(repo: RepoClient) -> Self {
        Self { repo }
    }

    /// The newest published dbt release, if any.
    pub async fn latest_version(&self) -> Result<Option<ToolVersion>, RunnerError> {
        let names = self
            .repo
            .transport()
            .list(self.repo.dbt_base_url())
            .await
            .map_err(RepoError::from)?;
        Ok(ToolVersion::latest_of(
            names.iter().filter_map(|n| n.parse().ok()),
        ))
    }

    /// Whether `binary` matches the digest published for the latest release.
    ///
    /// A repository with no published releases reads as current.
    pub async fn is_current(&self, binary: &Path) -> Result<bool, RunnerError> {
        let Some(latest) = self.latest_version().await? else {
            return Ok(true);
        };
        let url = self.repo.dbt_artifact_url(
            &latest,
            dbt_core::platform::os(),
            dbt_core::platform::arch(),
        );
        let published = self
            .repo
            .transport()
            .fetch_bytes(&format!("{url}.sha256"))
            .await
            .map_err(RepoError::from)?;
        let expected = String::from_utf8_lossy(&published).trim().to_string();

        let actual = sha256_hex_file(binary).map_err(|source| RunnerError::Io {
            path: binary.to_path_buf(),
            source,
        })?;
        debug!(%latest, expected, actual, "self-upgrade check");
        Ok(actual == expected)
    }

    /// Replace `binary` with the latest release, atomically.
    pub async fn upgrade_in_place(&self, binary: &Path) -> Result<(), RunnerError> {
        let Some(latest) = self.latest_version().await? else {
            return Ok(());
        };
        let url = self.repo.dbt_artifact_url(
            &latest,
            dbt_core::platform::os(),
            dbt_core::platform::arch(),
        );

        let scratch = scratch_path(binary);
        self.repo.fetch_file(&url, &scratch).await?;

        tokio::fs::rename(&scratch, binary)
            .await
            .map_err(|source| RunnerError::Io {
                path: binary.to_path_buf(),
                source,
            })?;
        info!(version = %latest, binary = %binary.display(), "dbt upgraded in place");
        Ok(())
    }
}

/// Scratch path in the same directory as the target binary.
fn scratch_path(binary: &Path) -> PathBuf {
    let mut name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dbt".to_string());
    name.push_str(SCRATCH_SUFFIX);
    binary.with_file_name(name)
}
