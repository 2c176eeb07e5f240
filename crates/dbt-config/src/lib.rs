// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client configuration for the dbt distribution fabric.
//!
//! The on-disk file is `~/.dbt/conf/dbt.json`. Two shapes are accepted: the
//! multi-server shape (named [`ServerProfile`]s plus a default) and the
//! legacy flat shape, which is lifted into a single synthetic `"default"`
//! profile so that downstream code only ever deals with the multi shape.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name given to the profile synthesized from a legacy flat config.
pub const DEFAULT_SERVER: &str = "default";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or selection.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed as either accepted JSON shape.
    #[error("failed to parse config {path}: {reason}")]
    ParseError {
        /// Path that was parsed.
        path: String,
        /// Human-readable parse error detail.
        reason: String,
    },

    /// A requested server profile does not exist.
    #[error("no server named '{name}' in config (known: {known:?})")]
    UnknownServer {
        /// The requested profile name.
        name: String,
        /// The names that do exist.
        known: Vec<String>,
    },

    /// The config names no default and no selection was given.
    #[error("config has no default server; pass --server or set DBT_SERVER")]
    NoDefaultServer,
}

// ---------------------------------------------------------------------------
// Auth descriptors
// ---------------------------------------------------------------------------

/// Per-profile authentication settings.
///
/// Credential fields come in literal / file / shell-hook variants; resolution
/// order is the concern of the request builder, not of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthDescriptor {
    /// HTTP Basic credentials.
    #[serde(rename_all = "camelCase")]
    Basic {
        /// Literal user name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// Literal password.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        /// Shell command whose first output line is the user name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username_hook: Option<String>,
        /// Shell command whose first output line is the password.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password_hook: Option<String>,
    },

    /// SSH-agent-signed JWT presented in the `Token` header.
    #[serde(rename_all = "camelCase")]
    SshJwt {
        /// JWT subject.
        username: String,
        /// Literal OpenSSH public key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubkey: Option<String>,
        /// Path to a public key file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubkey_path: Option<PathBuf>,
        /// Shell command whose first output line is the public key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pubkey_hook: Option<String>,
    },

    /// SSH-to-OIDC token exchange.
    #[serde(rename_all = "camelCase")]
    Oidc {
        /// OIDC issuer URL.
        issuer: String,
        /// Audience requested in the exchange.
        audience: String,
        /// OAuth2 client id.
        client_id: String,
        /// OAuth2 client secret, when the issuer requires one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_secret: Option<String>,
        /// JWT subject for the SSH-signed subject token.
        username: String,
        /// Issuer connector id (e.g. a Dex connector).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connector_id: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// One named repository endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProfile {
    /// Base URL of the dbt release repository.
    pub repository: String,
    /// URL of the trust store.
    pub truststore: String,
    /// Base URL of the tools repository.
    pub tools_repository: String,
    /// Authentication for this server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
}

/// The full client configuration: named profiles plus a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbtConfig {
    /// Profile used when neither `--server` nor `DBT_SERVER` selects one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,
    /// Named server profiles.
    pub servers: BTreeMap<String, ServerProfile>,
}

impl DbtConfig {
    /// Load the configuration from a JSON file.
    ///
    /// Accepts both the multi-server shape and the legacy flat shape; the
    /// latter is lifted into a single `"default"` profile.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileNotFound {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw).map_err(|reason| ConfigError::ParseError {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Parse configuration JSON, lifting the legacy shape if necessary.
    pub fn parse(raw: &str) -> Result<Self, String> {
        // The multi shape is distinguished by its `servers` map.
        match serde_json::from_str::<DbtConfig>(raw) {
            Ok(cfg) => Ok(cfg),
            Err(multi_err) => match serde_json::from_str::<ServerProfile>(raw) {
                Ok(profile) => Ok(Self::lift(profile)),
                // The multi-shape error is the one worth surfacing; the
                // legacy shape is an accepted fallback, not the contract.
                Err(_) => Err(multi_err.to_string()),
            },
        }
    }

    /// Wrap a legacy flat profile into the multi-server shape.
    fn lift(profile: ServerProfile) -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(DEFAULT_SERVER.to_string(), profile);
        Self {
            default_server: Some(DEFAULT_SERVER.to_string()),
            servers,
        }
    }

    /// Select a server profile.
    ///
    /// Priority: a non-empty `flag` (the `--server` option), then a non-empty
    /// `env` value (`DBT_SERVER`), then the configured default. Naming a
    /// profile that does not exist is an error that carries the name.
    pub fn select_server(
        &self,
        flag: Option<&str>,
        env: Option<&str>,
    ) -> Result<(&str, &ServerProfile), ConfigError> {
        let requested = [flag, env]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty());

        let name = match requested {
            Some(name) => name,
            None => self
                .default_server
                .as_deref()
                .ok_or(ConfigError::NoDefaultServer)?,
        };

        match self.servers.get_key_value(name) {
            Some((name, profile)) => Ok((name, profile)),
            None => Err(ConfigError::UnknownServer {
                name: name.to_string(),
                known: self.servers.keys().cloned().collect(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk layout
// ---------------------------------------------------------------------------

/// Path helpers for the `~/.dbt` tree.
#[derive(Debug, Clone)]
pub struct DbtPaths {
    home: PathBuf,
}

impl DbtPaths {
    /// Anchor the layout at a home directory.
    pub fn new(homedir: impl Into<PathBuf>) -> Self {
        Self {
            home: homedir.into(),
        }
    }

    /// `<home>/.dbt`.
    pub fn root(&self) -> PathBuf {
        self.home.join(".dbt")
    }

    /// `<home>/.dbt/conf/dbt.json`.
    pub fn config_file(&self) -> PathBuf {
        self.root().join("conf").join("dbt.json")
    }

    /// `<home>/.dbt/trust/truststore`.
    pub fn truststore(&self) -> PathBuf {
        self.root().join("trust").join("truststore")
    }

    /// Tool directory for a server profile.
    ///
    /// The default profile shares the legacy flat layout
    /// (`<home>/.dbt/tools`); named profiles get their own subdirectory.
    pub fn tools_dir(&self, server: &str) -> PathBuf {
        let tools = self.root().join("tools");
        if server == DEFAULT_SERVER {
            tools
        } else {
            tools.join(server)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_config() -> DbtConfig {
        DbtConfig::parse(
            r#"{
                "defaultServer": "prod",
                "servers": {
                    "prod": {
                        "repository": "https://prod/dbt",
                        "truststore": "https://prod/dbt/truststore",
                        "toolsRepository": "https://prod/dbt-tools"
                    },
                    "dev": {
                        "repository": "https://dev/dbt",
                        "truststore": "https://dev/dbt/truststore",
                        "toolsRepository": "https://dev/dbt-tools",
                        "auth": {
                            "type": "ssh-jwt",
                            "username": "nik",
                            "pubkeyPath": "/home/nik/.ssh/id_ed25519.pub"
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_multi_server_shape() {
        let cfg = multi_config();
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.default_server.as_deref(), Some("prod"));
    }

    #[test]
    fn legacy_flat_shape_is_lifted() {
        let cfg = DbtConfig::parse(
            r#"{
                "repository": "https://repo/dbt",
                "truststore": "https://repo/dbt/truststore",
                "toolsRepository": "https://repo/dbt-tools",
                "auth": {"type": "basic", "username": "u", "password": "p"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.default_server.as_deref(), Some(DEFAULT_SERVER));
        assert_eq!(cfg.servers.len(), 1);
        let profile = &cfg.servers[DEFAULT_SERVER];
        assert_eq!(profile.repository, "https://repo/dbt");
        assert!(matches!(
            profile.auth,
            Some(AuthDescriptor::Basic { .. })
        ));
    }

    #[test]
    fn flag_wins_over_default() {
        let cfg = multi_config();
        let (name, profile) = cfg.select_server(Some("dev"), None).unwrap();
        assert_eq!(name, "dev");
        assert_eq!(profile.repository, "https://dev/dbt");
    }

    #[test]
    fn empty_flag_falls_through_to_env() {
        let cfg = multi_config();
        let (name, _) = cfg.select_server(Some(""), Some("dev")).unwrap();
        assert_eq!(name, "dev");
    }

    #[test]
    fn default_used_when_nothing_selected() {
        let cfg = multi_config();
        let (name, profile) = cfg.select_server(None, None).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(profile.repository, "https://prod/dbt");
    }

    #[test]
    fn unknown_env_server_errors_with_the_name() {
        let cfg = multi_config();
        let err = cfg.select_server(Some(""), Some("staging")).unwrap_err();
        assert!(err.to_string().contains("staging"), "{err}");
    }

    #[test]
    fn no_default_and_no_selection_is_an_error() {
        let mut cfg = multi_config();
        cfg.default_server = None;
        assert!(matches!(
            cfg.select_server(None, None),
            Err(ConfigError::NoDefaultServer)
        ));
    }

    #[test]
    fn oidc_descriptor_round_trips() {
        let json = r#"{
            "type": "oidc",
            "issuer": "https://dex.example.com",
            "audience": "repo.example.com",
            "clientId": "dbt",
            "username": "nik",
            "connectorId": "ldap"
        }"#;
        let auth: AuthDescriptor = serde_json::from_str(json).unwrap();
        match &auth {
            AuthDescriptor::Oidc {
                issuer,
                client_secret,
                connector_id,
                ..
            } => {
                assert_eq!(issuer, "https://dex.example.com");
                assert!(client_secret.is_none());
                assert_eq!(connector_id.as_deref(), Some("ldap"));
            }
            other => panic!("expected oidc, got {other:?}"),
        }
        let back = serde_json::to_string(&auth).unwrap();
        let again: AuthDescriptor = serde_json::from_str(&back).unwrap();
        assert_eq!(auth, again);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbt.json");
        std::fs::write(
            &path,
            r#"{
                "repository": "https://repo/dbt",
                "truststore": "https://repo/dbt/truststore",
                "toolsRepository": "https://repo/dbt-tools"
            }"#,
        )
        .unwrap();
        let cfg = DbtConfig::load(&path).unwrap();
        assert!(cfg.servers.contains_key(DEFAULT_SERVER));
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = DbtConfig::load(Path::new("/nonexistent/dbt.json")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbt.json");
        std::fs::write(&path, "{nope").unwrap();
        let err = DbtConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn paths_follow_the_dot_dbt_layout() {
        let paths = DbtPaths::new("/home/nik");
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/home/nik/.dbt/conf/dbt.json")
        );
        assert_eq!(
            paths.truststore(),
            PathBuf::from("/home/nik/.dbt/trust/truststore")
        );
    }

    #[test]
    fn default_profile_shares_the_flat_tools_dir() {
        let paths = DbtPaths::new("/home/nik");
        assert_eq!(
            paths.tools_dir(DEFAULT_SERVER),
            PathBuf::from("/home/nik/.dbt/tools")
        );
        assert_eq!(
            paths.tools_dir("dev"),
            PathBuf::from("/home/nik/.dbt/tools/dev")
        );
    }
}
