// SPDX-License-Identifier: MIT OR Apache-2.0
//! SSH-to-OIDC token exchange (RFC 8693).
//!
//! The client presents an SSH-agent-signed JWT as the subject token and
//! redeems it for an OIDC ID token, which is cached until shortly before its
//! expiry. The cache is shared: reads take the shared side of a [`RwLock`],
//! replacement takes the exclusive side, and an entry is treated as invalid
//! 30 seconds before its real expiry to absorb clock skew.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dbt_auth::{sign_token, AuthError, JwtSigner, TokenProvider};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Seconds before real expiry at which a cached token stops being used.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// Expiry assumed when the issuer reports `expires_in = 0`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// HTTP timeout for the exchange request.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
const REQUESTED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
const SCOPE: &str = "openid email groups profile";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised during token exchange.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// Signing the subject token failed.
    #[error("cannot sign subject token")]
    Sign(#[from] AuthError),

    /// The exchange request could not be sent.
    #[error("token exchange request to {url} failed")]
    Http {
        /// The token endpoint.
        url: String,
        /// Transport detail.
        #[source]
        source: reqwest::Error,
    },

    /// The issuer answered with a non-success status.
    #[error("token exchange at {url} returned {status}: {body}")]
    Status {
        /// The token endpoint.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, for issuer-side diagnostics.
        body: String,
    },

    /// The response was not the expected JSON shape.
    #[error("token exchange response from {url} could not be decoded")]
    Decode {
        /// The token endpoint.
        url: String,
        /// Parser detail.
        #[source]
        source: reqwest::Error,
    },

    /// The response carried neither an ID token nor an access token.
    #[error("token exchange response from {url} contained no token")]
    EmptyToken {
        /// The token endpoint.
        url: String,
    },
}

// ---------------------------------------------------------------------------
// Config and cache
// ---------------------------------------------------------------------------

/// Settings for one issuer.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// OIDC issuer base URL.
    pub issuer: String,
    /// Audience requested for the ID token, also the subject JWT's audience.
    pub audience: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret, when required by the issuer.
    pub client_secret: Option<String>,
    /// Subject for the SSH-signed JWT.
    pub username: String,
    /// Issuer connector id (e.g. a Dex connector), when required.
    pub connector_id: Option<String>,
}

/// One cached ID token.
#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Valid while `now` is more than the buffer ahead of expiry.
    fn valid_at(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_BUFFER_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: u64,
    id_token: Option<String>,
}

// ---------------------------------------------------------------------------
// ExchangeClient
// ---------------------------------------------------------------------------

/// The exchange client: signs, exchanges, caches.
pub struct ExchangeClient {
    config: ExchangeConfig,
    signer: Arc<dyn JwtSigner>,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl ExchangeClient {
    /// Create a client for one issuer.
    pub fn new(config: ExchangeConfig, signer: Arc<dyn JwtSigner>) -> Result<Self, OidcError> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .map_err(|source| OidcError::Http {
                url: config.issuer.clone(),
                source,
            })?;
        Ok(Self {
            config,
            signer,
            http,
            cache: RwLock::new(None),
        })
    }

    /// The token endpoint: issuer URL, trailing slash stripped, plus `/token`.
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.config.issuer.trim_end_matches('/'))
    }

    /// Return a valid ID token, exchanging a fresh subject token if the
    /// cached one has entered its expiry buffer.
    pub async fn token(&self) -> Result<String, OidcError> {
        if let Some(token) = self.cached().await {
            debug!("using cached id token");
            return Ok(token);
        }

        let token = self.exchange().await?;
        Ok(token)
    }

    async fn cached(&self) -> Option<String> {
        let guard = self.cache.read().await;
        guard
            .as_ref()
            .filter(|entry| entry.valid_at(Utc::now()))
            .map(|entry| entry.token.clone())
    }

    async fn exchange(&self) -> Result<String, OidcError> {
        let subject_token = sign_token(
            self.signer.as_ref(),
            &self.config.username,
            &self.config.audience,
        )
        .await?;

        let url = self.token_endpoint();
        debug!(url = %url, subject = %self.config.username, "exchanging ssh jwt for id token");

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("subject_token", &subject_token),
            ("requested_token_type", REQUESTED_TOKEN_TYPE),
            ("scope", SCOPE),
            ("client_id", &self.config.client_id),
            ("audience", &self.config.audience),
        ];
        if let Some(connector) = &self.config.connector_id {
            form.push(("connector_id", connector));
        }
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|source| OidcError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OidcError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExchangeResponse =
            response
                .json()
                .await
                .map_err(|source| OidcError::Decode {
                    url: url.clone(),
                    source,
                })?;

        let token = parsed
            .id_token
            .or(parsed.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(OidcError::EmptyToken { url })?;

        let expires_in = if parsed.expires_in == 0 {
            DEFAULT_EXPIRES_IN_SECS
        } else {
            parsed.expires_in
        };
        let expires_at = Utc::now() + ChronoDuration::seconds(expires_in as i64);
        debug!(expires_at = %expires_at, "id token obtained");

        let mut guard = self.cache.write().await;
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for ExchangeClient {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        self.token().await.map_err(|e| AuthError::Provider {
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
