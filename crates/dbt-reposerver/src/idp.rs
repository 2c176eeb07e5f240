// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identity-provider lookups for SSH-JWT auth.
//!
//! Two sources produce the public key a subject must prove possession of:
//! a JSON file with independent read-side and write-side user lists, or a
//! shell command run with the subject as its final argument.

use crate::auth::Access;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where public keys come from.
#[derive(Debug)]
pub enum IdpLookup {
    /// A `{getUsers, putUsers}` JSON file.
    File(PathBuf),
    /// A shell command; the subject is appended as an argument and the first
    /// line of stdout is the key.
    Command(String),
}

/// One user entry in the identity-provider file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpUser {
    /// Subject name, matched exactly.
    pub username: String,
    /// OpenSSH authorized-keys line.
    pub publickey: String,
}

/// The identity-provider file: independent read and write user lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdpFile {
    /// Users allowed to read.
    #[serde(default)]
    pub get_users: Vec<IdpUser>,
    /// Users allowed to write.
    #[serde(default)]
    pub put_users: Vec<IdpUser>,
}

impl IdpFile {
    /// Load and parse an identity-provider file.
    pub fn load(path: &Path) -> Result<Self, IdpError> {
        let raw = std::fs::read_to_string(path).map_err(|source| IdpError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| IdpError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// First matching public key for a subject on one side.
    pub fn pubkey_for(&self, access: Access, subject: &str) -> Option<&str> {
        let users = match access {
            Access::Read => &self.get_users,
            Access::Write => &self.put_users,
        };
        users
            .iter()
            .find(|u| u.username == subject)
            .map(|u| u.publickey.as_str())
    }
}

/// Errors raised by identity-provider lookups.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// The file could not be read.
    #[error("cannot read identity provider file {path}")]
    Io {
        /// The configured path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not the expected JSON shape.
    #[error("cannot parse identity provider file {path}")]
    Parse {
        /// The configured path.
        path: PathBuf,
        /// Parser detail.
        #[source]
        source: serde_json::Error,
    },

    /// The idp command failed.
    #[error("identity provider command '{command}' failed: {detail}")]
    Command {
        /// The configured command.
        command: String,
        /// What went wrong.
        detail: String,
    },
}

/// Resolve a subject's public key through either lookup source.
pub async fn lookup_pubkey(
    lookup: &IdpLookup,
    access: Access,
    subject: &str,
) -> Result<Option<String>, IdpError> {
    match lookup {
        IdpLookup::File(path) => {
            let file = IdpFile::load(path)?;
            Ok(file.pubkey_for(access, subject).map(String::from))
        }
        IdpLookup::Command(command) => {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                // The subject rides as a positional argument, never spliced
                // into the command string.
                .arg(format!("{command} \"$1\""))
                .arg("idp")
                .arg(subject)
                .output()
                .await
                .map_err(|e| IdpError::Command {
                    command: command.clone(),
                    detail: e.to_string(),
                })?;

            if !output.status.success() {
                return Err(IdpError::Command {
                    command: command.clone(),
                    detail: format!("exited with {}", output.status),
                });
            }

            let first_line = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            Ok((!first_line.is_empty()).then_some(first_line))
        }
    }
}
