// SPDX-License-Identifier: MIT OR Apache-2.0
//! Storage handlers: the static file tree, checksummed PUT, and contained
//! DELETE.

use crate::auth::Access;
use crate::SharedState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Upload checksum headers, paired with their digest functions.
const CHECKSUM_HEADERS: &[(&str, fn(&[u8]) -> String)] = &[
    ("X-Checksum-Md5", dbt_core::md5_hex),
    ("X-Checksum-Sha1", dbt_core::sha1_hex),
    ("X-Checksum-Sha256", dbt_core::sha256_hex),
];

// ---------------------------------------------------------------------------
// Path containment
// ---------------------------------------------------------------------------

/// Resolve a request path to an absolute path under `root`.
///
/// The path is normalized lexically (`.` dropped, `..` popped); any attempt
/// to climb above the root is an error. The returned path always has the
/// absolute root as a prefix.
pub fn resolve_under_root(root: &Path, request_path: &str) -> Result<PathBuf, PathEscape> {
    let decoded = percent_decode_str(request_path).decode_utf8_lossy();

    let mut stack: Vec<&str> = Vec::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(PathEscape);
                }
            }
            name => stack.push(name),
        }
    }

    let mut resolved = root.to_path_buf();
    for component in stack {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Marker error: the request path escapes the server root.
#[derive(Debug, PartialEq, Eq)]
pub struct PathEscape;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Fallback handler: routes by HTTP method with the per-method auth policy.
pub async fn dispatch(State(state): SharedState, request: Request) -> Response {
    let method = request.method().clone();
    let raw_path = request.uri().path().to_owned();

    let access = if method == Method::GET || method == Method::HEAD {
        Access::Read
    } else if method == Method::PUT || method == Method::DELETE {
        Access::Write
    } else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };

    let username = match state.authorize(request.headers(), access).await {
        Ok(username) => username,
        Err(response) => return response,
    };

    let target = match resolve_under_root(&state.root, &raw_path) {
        Ok(target) => target,
        Err(PathEscape) => {
            warn!(path = %raw_path, user = username.as_deref().unwrap_or("-"),
                  "request path escapes server root");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let mut response = if method == Method::GET {
        serve_file(&target, true).await
    } else if method == Method::HEAD {
        serve_file(&target, false).await
    } else if method == Method::PUT {
        put_file(&target, request, username.as_deref()).await
    } else {
        delete_path(&target, username.as_deref()).await
    };

    // Propagated from the auth layer so handlers and access logs agree on
    // the principal.
    if let Some(username) = &username {
        if let Ok(value) = header::HeaderValue::from_str(username) {
            response
                .headers_mut()
                .insert("X-Authenticated-Username", value);
        }
    }
    response
}

// ---------------------------------------------------------------------------
// GET / HEAD
// ---------------------------------------------------------------------------

/// Serve a file, or an HTML index for a directory.
///
/// The index format is the `<a href="name/">` convention ordinary static
/// servers emit, which is what the client's listing parser speaks.
async fn serve_file(target: &Path, with_body: bool) -> Response {
    if target.is_dir() {
        return match directory_index(target).await {
            Ok(html) => {
                let mut response = Response::builder()
                    .header(header::CONTENT_TYPE, "text/html; charset=utf-8");
                if !with_body {
                    response = response.header(header::CONTENT_LENGTH, html.len());
                }
                response
                    .body(if with_body { Body::from(html) } else { Body::empty() })
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        };
    }

    match tokio::fs::read(target).await {
        Ok(bytes) => {
            Response::builder()
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header(header::CONTENT_LENGTH, bytes.len())
                .body(if with_body {
                    Body::from(bytes)
                } else {
                    Body::empty()
                })
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn directory_index(dir: &Path) -> std::io::Result<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            names.push(format!("{name}/"));
        } else {
            names.push(name);
        }
    }
    names.sort();

    let mut html = String::from("<html><body>\n<a href=\"../\">../</a>\n");
    for name in names {
        html.push_str(&format!("<a href=\"{name}\">{name}</a>\n"));
    }
    html.push_str("</body></html>\n");
    Ok(html)
}

// ---------------------------------------------------------------------------
// PUT
// ---------------------------------------------------------------------------

/// Write an uploaded file.
///
/// The whole body is read first so checksum verification and the write are
/// atomic with respect to each other; any supplied `X-Checksum-*` header
/// must match the computed digest exactly or nothing is written.
async fn put_file(target: &Path, request: Request, username: Option<&str>) -> Response {
    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    if let Err(response) = verify_upload_checksums(&headers, &body, target) {
        return response;
    }

    if let Some(parent) = target.parent() {
        if let Err(e) = create_dirs(parent).await {
            warn!(path = %parent.display(), error = %e, "cannot create parent directories");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if let Err(e) = write_file(target, &body).await {
        warn!(path = %target.display(), error = %e, "write failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(
        path = %target.display(),
        bytes = body.len(),
        user = username.unwrap_or("-"),
        "stored"
    );
    StatusCode::CREATED.into_response()
}

fn verify_upload_checksums(
    headers: &HeaderMap,
    body: &[u8],
    target: &Path,
) -> Result<(), Response> {
    for (name, digest) in CHECKSUM_HEADERS {
        let Some(supplied) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let computed = digest(body);
        if supplied.trim() != computed {
            warn!(
                path = %target.display(),
                header = name,
                supplied = supplied.trim(),
                computed = %computed,
                "upload checksum mismatch"
            );
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    }
    Ok(())
}

async fn create_dirs(parent: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(parent).await?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(parent, Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}

async fn write_file(target: &Path, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(target, body).await?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(target, Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

/// Delete a file or recursively delete a directory.
async fn delete_path(target: &Path, username: Option<&str>) -> Response {
    let metadata = match tokio::fs::metadata(target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    };

    match result {
        Ok(()) => {
            info!(path = %target.display(), user = username.unwrap_or("-"), "deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
