// SPDX-License-Identifier: MIT OR Apache-2.0
//! The dbt repository server.
//!
//! Serves a signed-artifact file tree under `serverRoot`, a small JSON
//! metadata API, and a health probe, with per-HTTP-method authentication:
//!
//! | Method     | Handler                          | Auth            |
//! |------------|----------------------------------|-----------------|
//! | GET, HEAD  | static file tree                 | `authTypeGet`*  |
//! | PUT        | checksummed write                | `authTypePut`   |
//! | DELETE     | contained recursive delete       | `authTypePut`   |
//! | GET        | `/-/api/tools`, `/-/api/tools/{name}/versions` | `authTypeGet`* |
//! | GET        | `/healthz`                       | none            |
//!
//! \* only when `authGets` is set; reads are public otherwise.

#![deny(unsafe_code)]

pub mod api;
pub mod auth;
pub mod htpasswd;
pub mod idp;
pub mod oidc;
pub mod storage;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal configuration / startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configuration file could not be read.
    #[error("config file not found: {path}")]
    ConfigNotFound {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse config {path}: {reason}")]
    ConfigParse {
        /// Path that was parsed.
        path: String,
        /// Parse detail.
        reason: String,
    },

    /// An `authType*` entry names no known scheme.
    #[error("unknown auth type '{name}'")]
    UnknownAuthType {
        /// The offending scheme name.
        name: String,
    },

    /// A scheme is configured but its required options are missing.
    #[error("auth type '{scheme}' requires option '{option}'")]
    MissingAuthOption {
        /// The scheme missing configuration.
        scheme: String,
        /// The absent option.
        option: String,
    },

    /// The server root could not be prepared.
    #[error("cannot prepare server root {path}")]
    ServerRoot {
        /// The configured root.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Binding the listen address failed.
    #[error("cannot bind {address}")]
    Bind {
        /// The configured `address:port`.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9999
}

/// Scheme-specific options, shared by every scheme on one side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOpts {
    /// Identity file: `{getUsers, putUsers}` for SSH schemes, an htpasswd
    /// file for `basic-htpasswd`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_file: Option<PathBuf>,

    /// Shell command producing a public key for a subject (appended as the
    /// final argument).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_func: Option<String>,

    /// Literal expected bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,

    /// Environment variable holding the expected bearer token; wins over
    /// the literal when it resolves non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_token_env: Option<String>,

    /// OIDC validation settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<oidc::OidcOptions>,
}

/// Server configuration, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the served artifact tree.
    pub server_root: PathBuf,

    /// Comma-separated auth schemes for reads, in fallback order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type_get: Option<String>,

    /// Comma-separated auth schemes for writes, in fallback order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type_put: Option<String>,

    /// Whether reads require authentication at all.
    #[serde(default)]
    pub auth_gets: bool,

    /// Options for the read-side schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_opts_get: Option<AuthOpts>,

    /// Options for the write-side schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_opts_put: Option<AuthOpts>,
}

impl ServerConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigNotFound {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| ServerError::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// State and app
// ---------------------------------------------------------------------------

/// Shared server state.
#[derive(Debug)]
pub struct AppState {
    /// Absolute server root.
    pub root: PathBuf,
    /// Read-side checker chain, when configured.
    pub get_auth: Option<auth::MultiAuth>,
    /// Write-side checker chain, when configured.
    pub put_auth: Option<auth::MultiAuth>,
    /// Whether reads are authenticated at all.
    pub auth_gets: bool,
}

/// Build runtime state from a configuration, failing fast on bad auth
/// settings.
pub async fn build_state(config: &ServerConfig) -> Result<AppState, ServerError> {
    tokio::fs::create_dir_all(&config.server_root)
        .await
        .map_err(|source| ServerError::ServerRoot {
            path: config.server_root.clone(),
            source,
        })?;
    let root = tokio::fs::canonicalize(&config.server_root)
        .await
        .map_err(|source| ServerError::ServerRoot {
            path: config.server_root.clone(),
            source,
        })?;

    let get_auth = auth::MultiAuth::from_config(
        config.auth_type_get.as_deref(),
        config.auth_opts_get.as_ref(),
    )?;
    let put_auth = auth::MultiAuth::from_config(
        config.auth_type_put.as_deref(),
        config.auth_opts_put.as_ref(),
    )?;

    Ok(AppState {
        root,
        get_auth,
        put_auth,
        auth_gets: config.auth_gets,
    })
}

/// Build the Axum router with all server routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/-/api/tools", get(api::list_tools))
        .route("/-/api/tools/{name}/versions", get(api::list_versions))
        .fallback(storage::dispatch)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Run the server until interrupted.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let address = format!("{}:{}", config.address, config.port);
    let state = Arc::new(build_state(&config).await?);
    let app = build_app(state);

    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
    info!(%address, root = %config.server_root.display(), "reposerver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    Ok(())
}

async fn shutdown_signal() {
    // Serve until ctrl-c; in-flight writes finish before exit.
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

/// State extractor alias used by the handler modules.
pub type SharedState = State<Arc<AppState>>;
