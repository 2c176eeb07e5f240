// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential resolution: literal values, files, and shell hooks.

use crate::AuthError;
use std::path::Path;
use tokio::process::Command;

/// Run a shell hook and return its stdout with the trailing newline stripped.
pub async fn shell_hook(command: &str) -> Result<String, AuthError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| AuthError::Hook {
            command: command.into(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(AuthError::Hook {
            command: command.into(),
            detail: format!("exited with {}", output.status),
        });
    }

    let mut out = String::from_utf8_lossy(&output.stdout).into_owned();
    while out.ends_with('\n') || out.ends_with('\r') {
        out.pop();
    }
    Ok(out)
}

/// Resolve a value that is either a literal or produced by a hook.
///
/// A configured hook wins over the literal.
pub async fn literal_or_hook(
    literal: Option<&str>,
    hook: Option<&str>,
) -> Result<Option<String>, AuthError> {
    if let Some(cmd) = hook.filter(|c| !c.trim().is_empty()) {
        return Ok(Some(shell_hook(cmd).await?));
    }
    Ok(literal
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from))
}

/// Resolve a public key from hook, file, or literal, in that order.
pub async fn pubkey_from_sources(
    literal: Option<&str>,
    path: Option<&Path>,
    hook: Option<&str>,
) -> Result<Option<String>, AuthError> {
    if let Some(cmd) = hook.filter(|c| !c.trim().is_empty()) {
        return Ok(Some(shell_hook(cmd).await?));
    }
    if let Some(path) = path {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AuthError::CredentialFile {
                path: path.to_path_buf(),
                source,
            })?;
        return Ok(Some(raw.trim().to_string()));
    }
    Ok(literal
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from))
}
