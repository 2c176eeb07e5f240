// SPDX-License-Identifier: MIT OR Apache-2.0
//! The read-only JSON metadata API.
//!
//! `/-/api/tools` lists tool directory names; `/-/api/tools/{name}/versions`
//! lists `{version, modifiedAt}` for each semver-named subdirectory. Both sit
//! behind the read-side auth policy when `authGets` is set.

use crate::auth::Access;
use crate::SharedState;
use axum::extract::{Path as AxPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use dbt_core::{ToolVersion, VersionInfo, TOOLS_PREFIX};
use std::path::Path;
use tracing::warn;

/// `GET /-/api/tools`: tool directory names.
///
/// A repository that has no `dbt-tools` tree yet simply has no tools: the
/// answer is an empty list, not a 404.
pub async fn list_tools(State(state): SharedState, headers: HeaderMap) -> Response {
    if let Err(response) = state.authorize(&headers, Access::Read).await {
        return response;
    }

    let tools_dir = state.root.join(TOOLS_PREFIX);
    if !tools_dir.is_dir() {
        return Json(Vec::<String>::new()).into_response();
    }

    match list_directories(&tools_dir).await {
        Ok(mut names) => {
            names.sort();
            Json(names).into_response()
        }
        Err(e) => {
            warn!(path = %tools_dir.display(), error = %e, "tool listing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /-/api/tools/{name}/versions`: `{version, modifiedAt}` entries.
pub async fn list_versions(
    State(state): SharedState,
    AxPath(name): AxPath<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = state.authorize(&headers, Access::Read).await {
        return response;
    }

    // The tool name is a single path component by construction of the
    // route, but a dotted name could still climb.
    if name.contains('/') || name == ".." {
        return StatusCode::FORBIDDEN.into_response();
    }

    let tool_dir = state.root.join(TOOLS_PREFIX).join(&name);
    if !tool_dir.is_dir() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match version_infos(&tool_dir).await {
        Ok(mut infos) => {
            infos.sort_by(|a, b| a.version.cmp(&b.version));
            Json(infos).into_response()
        }
        Err(e) => {
            warn!(path = %tool_dir.display(), error = %e, "version listing failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn list_directories(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

async fn version_infos(tool_dir: &Path) -> std::io::Result<Vec<VersionInfo>> {
    let mut infos = Vec::new();
    let mut entries = tokio::fs::read_dir(tool_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(version) = name.parse::<ToolVersion>() else {
            continue;
        };
        let modified = entry.metadata().await?.modified()?;
        infos.push(VersionInfo {
            version,
            modified_at: DateTime::<Utc>::from(modified),
        });
    }
    Ok(infos)
}
