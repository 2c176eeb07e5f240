// SPDX-License-Identifier: MIT OR Apache-2.0
//! The multi-scheme authentication layer.
//!
//! `authType*` is a comma-separated list of scheme names; the checkers run in
//! declaration order and the first one to produce a username wins. A failed
//! chain is a bare `401`; which check failed is logged server-side, never
//! revealed to the client.

use crate::htpasswd::Htpasswd;
use crate::idp::{self, IdpLookup};
use crate::oidc::OidcValidator;
use crate::{AppState, AuthOpts, ServerError};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

/// Principal reported for successful static-token auth, which carries no
/// identity of its own.
const STATIC_TOKEN_USER: &str = "token";

/// Whether a request reads or mutates the tree; selects the identity list
/// consulted for SSH schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// GET / HEAD.
    Read,
    /// PUT / DELETE.
    Write,
}

// ---------------------------------------------------------------------------
// Scheme parsing
// ---------------------------------------------------------------------------

/// Parse a comma-separated scheme list, trimming whitespace and dropping
/// empty elements.
pub fn parse_auth_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Checkers
// ---------------------------------------------------------------------------

/// One authentication scheme, ready to check requests.
#[derive(Debug)]
pub enum AuthChecker {
    /// `Authorization: Bearer` against a fixed token.
    StaticToken {
        /// Literal expected token.
        token: Option<String>,
        /// Environment variable that overrides the literal.
        token_env: Option<String>,
    },
    /// HTTP Basic against an htpasswd file.
    BasicHtpasswd(Htpasswd),
    /// `Token:` SSH JWT against a pubkey source.
    SshAgent(IdpLookup),
    /// `Authorization: Bearer` OIDC ID token.
    Oidc(OidcValidator),
}

impl AuthChecker {
    fn scheme_name(&self) -> &'static str {
        match self {
            Self::StaticToken { .. } => "static-token",
            Self::BasicHtpasswd(_) => "basic-htpasswd",
            Self::SshAgent(IdpLookup::File(_)) => "ssh-agent-file",
            Self::SshAgent(IdpLookup::Command(_)) => "ssh-agent-func",
            Self::Oidc(_) => "oidc",
        }
    }

    /// Run this scheme. `None` means "did not authenticate"; the reason has
    /// already been logged.
    async fn check(&self, headers: &HeaderMap, access: Access) -> Option<String> {
        match self {
            Self::StaticToken { token, token_env } => {
                check_static_token(headers, token.as_deref(), token_env.as_deref())
            }
            Self::BasicHtpasswd(htpasswd) => check_basic(headers, htpasswd),
            Self::SshAgent(lookup) => check_ssh_jwt(headers, lookup, access).await,
            Self::Oidc(validator) => check_oidc(headers, validator).await,
        }
    }
}

// ---------------------------------------------------------------------------
// MultiAuth
// ---------------------------------------------------------------------------

/// An ordered chain of checkers; the first non-empty username wins.
#[derive(Debug)]
pub struct MultiAuth {
    checkers: Vec<AuthChecker>,
}

impl MultiAuth {
    /// Build a chain from an `authType*` string and its options.
    ///
    /// `None` (or an empty list) means the side is unauthenticated and no
    /// chain is returned.
    pub fn from_config(
        auth_types: Option<&str>,
        opts: Option<&AuthOpts>,
    ) -> Result<Option<Self>, ServerError> {
        let Some(raw) = auth_types else {
            return Ok(None);
        };
        let names = parse_auth_types(raw);
        if names.is_empty() {
            return Ok(None);
        }

        let mut checkers = Vec::with_capacity(names.len());
        for name in &names {
            checkers.push(build_checker(name, opts)?);
        }
        Ok(Some(Self { checkers }))
    }

    /// Run the chain in declaration order.
    pub async fn authenticate(&self, headers: &HeaderMap, access: Access) -> Option<String> {
        for checker in &self.checkers {
            if let Some(username) = checker.check(headers, access).await {
                if !username.is_empty() {
                    info!(
                        scheme = checker.scheme_name(),
                        user = %username,
                        "authenticated"
                    );
                    return Some(username);
                }
            }
        }
        None
    }
}

fn build_checker(name: &str, opts: Option<&AuthOpts>) -> Result<AuthChecker, ServerError> {
    let missing = |option: &str| ServerError::MissingAuthOption {
        scheme: name.to_string(),
        option: option.to_string(),
    };

    match name {
        "static-token" => {
            let opts = opts.cloned().unwrap_or_default();
            Ok(AuthChecker::StaticToken {
                token: opts.static_token,
                token_env: opts.static_token_env,
            })
        }
        "basic-htpasswd" => {
            let path = opts
                .and_then(|o| o.idp_file.clone())
                .ok_or_else(|| missing("idpFile"))?;
            Ok(AuthChecker::BasicHtpasswd(Htpasswd::load(&path).map_err(
                |_| ServerError::MissingAuthOption {
                    scheme: name.to_string(),
                    option: format!("readable htpasswd file at {}", path.display()),
                },
            )?))
        }
        "ssh-agent-file" => {
            let path = opts
                .and_then(|o| o.idp_file.clone())
                .ok_or_else(|| missing("idpFile"))?;
            Ok(AuthChecker::SshAgent(IdpLookup::File(path)))
        }
        "ssh-agent-func" => {
            let command = opts
                .and_then(|o| o.idp_func.clone())
                .ok_or_else(|| missing("idpFunc"))?;
            Ok(AuthChecker::SshAgent(IdpLookup::Command(command)))
        }
        "oidc" => {
            let options = opts
                .and_then(|o| o.oidc.clone())
                .ok_or_else(|| missing("oidc"))?;
            Ok(AuthChecker::Oidc(OidcValidator::new(options)))
        }
        other => Err(ServerError::UnknownAuthType {
            name: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Per-scheme checks
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn check_static_token(
    headers: &HeaderMap,
    token: Option<&str>,
    token_env: Option<&str>,
) -> Option<String> {
    // The env var wins when it resolves non-empty; an empty expected token
    // disables the scheme outright.
    let expected = token_env
        .and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
        .or_else(|| token.map(String::from))
        .filter(|v| !v.is_empty())?;

    let presented = bearer_token(headers)?;
    if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
        Some(STATIC_TOKEN_USER.to_string())
    } else {
        debug!("static token mismatch");
        None
    }
}

fn check_basic(headers: &HeaderMap, htpasswd: &Htpasswd) -> Option<String> {
    let encoded = headers
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;

    if htpasswd.verify(user, password) {
        Some(user.to_string())
    } else {
        debug!(user, "basic auth rejected");
        None
    }
}

async fn check_ssh_jwt(headers: &HeaderMap, lookup: &IdpLookup, access: Access) -> Option<String> {
    let token = headers.get(dbt_auth::TOKEN_HEADER)?.to_str().ok()?;

    // The subject has to come out of the unverified claims first; it selects
    // the public key everything else is checked against.
    let claims = match dbt_auth::unverified_claims(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "unparseable ssh jwt");
            return None;
        }
    };

    let pubkey = match idp::lookup_pubkey(lookup, access, &claims.sub).await {
        Ok(Some(pubkey)) => pubkey,
        Ok(None) => {
            debug!(subject = %claims.sub, "subject not in identity provider");
            return None;
        }
        Err(e) => {
            debug!(error = %e, "identity provider lookup failed");
            return None;
        }
    };

    let audience = expected_audience(headers)?;
    match dbt_auth::verify_token(token, &pubkey, &audience) {
        Ok(verified) => Some(verified.sub),
        Err(e) => {
            debug!(subject = %claims.sub, error = %e, "ssh jwt rejected");
            None
        }
    }
}

/// The audience a presented token must carry: the server's own domain, by
/// the same bare-domain rule the client signs with.
fn expected_audience(headers: &HeaderMap) -> Option<String> {
    let host = headers.get("Host")?.to_str().ok()?;
    dbt_auth::bare_domain(&format!("http://{host}")).ok()
}

async fn check_oidc(headers: &HeaderMap, validator: &OidcValidator) -> Option<String> {
    let token = bearer_token(headers)?;
    match validator.validate(token).await {
        Ok(username) => Some(username),
        Err(e) => {
            debug!(error = %e, "oidc token rejected");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// AppState integration
// ---------------------------------------------------------------------------

impl AppState {
    /// Apply the per-method auth policy.
    ///
    /// `Ok(None)` means the side is open; `Ok(Some(user))` is the principal;
    /// `Err` is a ready-made `401`.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        access: Access,
    ) -> Result<Option<String>, Response> {
        let chain = match access {
            Access::Read => {
                if !self.auth_gets {
                    return Ok(None);
                }
                self.get_auth.as_ref()
            }
            Access::Write => self.put_auth.as_ref(),
        };

        let Some(chain) = chain else {
            return Ok(None);
        };

        match chain.authenticate(headers, access).await {
            Some(username) => Ok(Some(username)),
            None => {
                info!("authentication failed");
                Err(StatusCode::UNAUTHORIZED.into_response())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn auth_type_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_auth_types(" static-token , basic-htpasswd ,, "),
            vec!["static-token", "basic-htpasswd"]
        );
        assert!(parse_auth_types("").is_empty());
        assert!(parse_auth_types(" , ").is_empty());
    }

    #[test]
    fn static_token_accepts_the_exact_token() {
        let headers = headers_with("Authorization", "Bearer sekrit");
        assert_eq!(
            check_static_token(&headers, Some("sekrit"), None),
            Some("token".to_string())
        );
    }

    #[test]
    fn static_token_rejects_wrong_token() {
        let headers = headers_with("Authorization", "Bearer wrong");
        assert_eq!(check_static_token(&headers, Some("sekrit"), None), None);
    }

    #[test]
    fn static_token_rejects_wrong_scheme() {
        let headers = headers_with("Authorization", "Basic sekrit");
        assert_eq!(check_static_token(&headers, Some("sekrit"), None), None);
    }

    #[test]
    fn empty_expected_token_disables_the_scheme() {
        let headers = headers_with("Authorization", "Bearer ");
        assert_eq!(check_static_token(&headers, Some(""), None), None);
        assert_eq!(check_static_token(&headers, None, None), None);
    }

    #[test]
    fn env_token_wins_over_literal() {
        // Set-and-forget: the variable name is unique to this test.
        std::env::set_var("DBT_TEST_STATIC_TOKEN", "from-env");
        let headers = headers_with("Authorization", "Bearer from-env");
        assert_eq!(
            check_static_token(&headers, Some("literal"), Some("DBT_TEST_STATIC_TOKEN")),
            Some("token".to_string())
        );
    }

    #[test]
    fn unset_env_falls_back_to_literal() {
        let headers = headers_with("Authorization", "Bearer literal");
        assert_eq!(
            check_static_token(&headers, Some("literal"), Some("DBT_TEST_NO_SUCH_VAR")),
            Some("token".to_string())
        );
    }

    #[test]
    fn unknown_scheme_is_a_config_error() {
        let err = build_checker("kerberos", None).unwrap_err();
        assert!(matches!(err, ServerError::UnknownAuthType { .. }));
    }

    #[test]
    fn ssh_agent_file_requires_idp_file() {
        let err = build_checker("ssh-agent-file", None).unwrap_err();
        assert!(matches!(err, ServerError::MissingAuthOption { .. }));
    }

    #[tokio::test]
    async fn multi_auth_is_order_preserving_and_short_circuiting() {
        std::env::set_var("DBT_TEST_MULTI_TOKEN", "chain-token");
        let opts = AuthOpts {
            static_token_env: Some("DBT_TEST_MULTI_TOKEN".into()),
            idp_func: Some("false".into()),
            ..Default::default()
        };
        let chain = MultiAuth::from_config(Some("static-token,ssh-agent-func"), Some(&opts))
            .unwrap()
            .unwrap();

        // First scheme wins; the (failing) idp func is never consulted.
        let headers = headers_with("Authorization", "Bearer chain-token");
        assert_eq!(
            chain.authenticate(&headers, Access::Write).await,
            Some("token".to_string())
        );

        // Neither scheme accepts: no principal.
        let headers = headers_with("Authorization", "Bearer wrong");
        assert_eq!(chain.authenticate(&headers, Access::Write).await, None);
    }

    #[test]
    fn empty_auth_type_list_disables_the_side() {
        assert!(MultiAuth::from_config(None, None).unwrap().is_none());
        assert!(MultiAuth::from_config(Some(" , "), None).unwrap().is_none());
    }

    #[test]
    fn expected_audience_uses_the_bare_host() {
        let headers = headers_with("Host", "www.repo.example.com:9999");
        assert_eq!(expected_audience(&headers).unwrap(), "repo.example.com");
    }
}
