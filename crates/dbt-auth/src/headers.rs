// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outbound request authorization.
//!
//! [`ProfileAuthorizer`] turns a server profile's auth descriptor into the
//! headers attached to every repository request. The resolution order is
//! fixed: user name, then password (Basic when both are non-empty), then
//! public key (hook over file over literal) for the SSH-JWT `Token` header.

use crate::agent::AgentSigner;
use crate::domain::bare_domain;
use crate::jwt::sign_token;
use crate::resolve::{literal_or_hook, pubkey_from_sources};
use crate::signer::JwtSigner;
use crate::{AuthError, TOKEN_HEADER};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dbt_config::{AuthDescriptor, ServerProfile};
use ssh_key::PublicKey;
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Supplies the auth headers for outbound repository requests.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Header name/value pairs to attach.
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError>;
}

/// Header source for unauthenticated repositories.
pub struct NoAuth;

#[async_trait]
impl HeaderSource for NoAuth {
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        Ok(Vec::new())
    }
}

/// Supplies a bearer token for OIDC-authenticated profiles.
///
/// Implemented by the SSH-to-OIDC exchange client; kept as a trait here so
/// this crate does not depend on the exchange machinery.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently valid ID token.
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

// ---------------------------------------------------------------------------
// ProfileAuthorizer
// ---------------------------------------------------------------------------

/// Builds auth headers for one server profile.
pub struct ProfileAuthorizer {
    auth: Option<AuthDescriptor>,
    repository: String,
    signer: Option<Arc<dyn JwtSigner>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl ProfileAuthorizer {
    /// Create an authorizer for a profile.
    pub fn new(profile: &ServerProfile) -> Self {
        Self {
            auth: profile.auth.clone(),
            repository: profile.repository.clone(),
            signer: None,
            token_provider: None,
        }
    }

    /// Substitute the SSH signer (tests, hardware tokens).
    ///
    /// Without this, an [`AgentSigner`] is created from `SSH_AUTH_SOCK` for
    /// the resolved public key.
    pub fn with_signer(mut self, signer: Arc<dyn JwtSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Wire the OIDC token provider used for `oidc` profiles.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    async fn ssh_jwt(
        &self,
        username: &str,
        pubkey: Option<&str>,
        pubkey_path: Option<&std::path::Path>,
        pubkey_hook: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        let Some(raw_key) = pubkey_from_sources(pubkey, pubkey_path, pubkey_hook).await? else {
            return Ok(None);
        };
        let audience = bare_domain(&self.repository)?;

        let token = match &self.signer {
            Some(signer) => sign_token(signer.as_ref(), username, &audience).await?,
            None => {
                let key =
                    PublicKey::from_openssh(&raw_key).map_err(|e| AuthError::BadPublicKey {
                        reason: e.to_string(),
                    })?;
                let signer = AgentSigner::from_env(key)?;
                sign_token(&signer, username, &audience).await?
            }
        };
        debug!(subject = username, audience = %audience, "minted ssh jwt");
        Ok(Some(token))
    }
}

#[async_trait]
impl HeaderSource for ProfileAuthorizer {
    async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        let mut out = Vec::new();

        match &self.auth {
            None => {}

            Some(AuthDescriptor::Basic {
                username,
                password,
                username_hook,
                password_hook,
            }) => {
                let user = literal_or_hook(username.as_deref(), username_hook.as_deref()).await?;
                let pass = literal_or_hook(password.as_deref(), password_hook.as_deref()).await?;
                if let (Some(user), Some(pass)) = (user, pass) {
                    if !user.is_empty() && !pass.is_empty() {
                        let encoded = BASE64.encode(format!("{user}:{pass}"));
                        out.push(("Authorization".to_string(), format!("Basic {encoded}")));
                    }
                }
            }

            Some(AuthDescriptor::SshJwt {
                username,
                pubkey,
                pubkey_path,
                pubkey_hook,
            }) => {
                if let Some(token) = self
                    .ssh_jwt(
                        username,
                        pubkey.as_deref(),
                        pubkey_path.as_deref(),
                        pubkey_hook.as_deref(),
                    )
                    .await?
                {
                    out.push((TOKEN_HEADER.to_string(), token));
                }
            }

            Some(AuthDescriptor::Oidc { .. }) => {
                let provider = self.token_provider.as_ref().ok_or_else(|| {
                    AuthError::Provider {
                        reason: "profile uses oidc auth but no token provider is wired".into(),
                    }
                })?;
                let token = provider.bearer_token().await?;
                out.push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
