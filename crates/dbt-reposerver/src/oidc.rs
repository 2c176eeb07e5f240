// SPDX-License-Identifier: MIT OR Apache-2.0
//! OIDC ID-token validation with JWKS caching.
//!
//! Verification order: signature (against a JWKS key selected by `kid`),
//! issuer (unless explicitly skipped for tests), expiry/not-before, audience
//! (with a manual intersection check when more than one audience is
//! configured), required claims, and group membership. The JWKS is fetched
//! through the issuer's discovery document and cached; the default TTL is
//! 300 seconds.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Default JWKS cache TTL in seconds.
const DEFAULT_JWKS_CACHE_SECS: u64 = 300;

/// Timeout for discovery and JWKS requests.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Claim fallback order when the configured username claim is empty.
const USERNAME_FALLBACK: &[&str] = &["preferred_username", "name", "email", "sub"];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// OIDC validation settings, from `authOpts.oidc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcOptions {
    /// Issuer base URL; discovery happens underneath it.
    pub issuer_url: String,

    /// Accepted audiences. A single entry uses the verifier's built-in
    /// check; multiple entries switch to an intersection check.
    #[serde(default)]
    pub audiences: Vec<String>,

    /// Claim the username is read from (`sub`, `email`,
    /// `preferred_username`, `name`). Defaults to `sub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim_key: Option<String>,

    /// Claims that must be present as exactly these string values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_claims: BTreeMap<String, String>,

    /// When non-empty, the token's `groups` claim must intersect this list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_groups: Vec<String>,

    /// Skip the issuer check. For tests only.
    #[serde(default)]
    pub skip_issuer_verify: bool,

    /// JWKS cache TTL override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_cache_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a token was rejected (logged, never sent to the client).
#[derive(Debug, thiserror::Error)]
pub enum OidcAuthError {
    /// Discovery or JWKS fetch failed.
    #[error("jwks unavailable: {reason}")]
    Jwks {
        /// Fetch detail.
        reason: String,
    },

    /// The token header is malformed or uses an unsupported algorithm.
    #[error("bad token header: {reason}")]
    Header {
        /// Parse detail.
        reason: String,
    },

    /// The token names a key the JWKS does not contain.
    #[error("unknown signing key '{kid}'")]
    UnknownKid {
        /// The token's key id.
        kid: String,
    },

    /// Signature, issuer, or time validation failed.
    #[error("token validation failed")]
    Decode(#[from] jsonwebtoken::errors::Error),

    /// The token's audience does not intersect the configured audiences.
    #[error("audience mismatch")]
    Audience,

    /// A required claim is absent or differs.
    #[error("required claim '{key}' missing or mismatched")]
    RequiredClaim {
        /// The claim key.
        key: String,
    },

    /// The token's groups do not intersect the allowed groups.
    #[error("no allowed group present")]
    Group,

    /// No username could be derived from the claims.
    #[error("token carries no usable username claim")]
    NoUsername,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[derive(Default, Debug)]
struct JwksCache {
    fetched_at: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

/// Validates bearer ID tokens for one issuer.
#[derive(Debug)]
pub struct OidcValidator {
    options: OidcOptions,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

impl OidcValidator {
    /// Create a validator; the JWKS is fetched lazily on first use.
    pub fn new(options: OidcOptions) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("default tls backend available");
        Self {
            options,
            http,
            jwks: RwLock::new(JwksCache::default()),
        }
    }

    /// Validate a token and derive its username.
    pub async fn validate(&self, token: &str) -> Result<String, OidcAuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| OidcAuthError::Header {
            reason: e.to_string(),
        })?;
        if header.alg != Algorithm::RS256 {
            return Err(OidcAuthError::Header {
                reason: format!("unsupported algorithm {:?}", header.alg),
            });
        }
        let kid = header.kid.ok_or_else(|| OidcAuthError::Header {
            reason: "token has no kid".into(),
        })?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        if self.options.skip_issuer_verify {
            validation.iss = None;
        } else {
            validation.set_issuer(&[self.options.issuer_url.as_str()]);
        }
        match self.options.audiences.len() {
            0 => validation.validate_aud = false,
            1 => validation.set_audience(&[self.options.audiences[0].as_str()]),
            // Multiple audiences: the built-in equality check cannot express
            // an intersection, so it is disabled and checked manually below.
            _ => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation)?;
        check_claims(&data.claims, &self.options)
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, OidcAuthError> {
        let ttl = Duration::from_secs(
            self.options
                .jwks_cache_seconds
                .unwrap_or(DEFAULT_JWKS_CACHE_SECS),
        );

        {
            let cache = self.jwks.read().await;
            let fresh = cache
                .fetched_at
                .is_some_and(|at| at.elapsed() < ttl);
            if fresh {
                return match cache.keys_by_kid.get(kid) {
                    Some(key) => Ok(key.clone()),
                    None => Err(OidcAuthError::UnknownKid { kid: kid.into() }),
                };
            }
        }

        let mut cache = self.jwks.write().await;
        // Another task may have refreshed while this one waited.
        let fresh = cache.fetched_at.is_some_and(|at| at.elapsed() < ttl);
        if !fresh {
            cache.keys_by_kid = self.fetch_jwks().await?;
            cache.fetched_at = Some(Instant::now());
            debug!(keys = cache.keys_by_kid.len(), "jwks refreshed");
        }
        match cache.keys_by_kid.get(kid) {
            Some(key) => Ok(key.clone()),
            None => Err(OidcAuthError::UnknownKid { kid: kid.into() }),
        }
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, DecodingKey>, OidcAuthError> {
        let issuer = self.options.issuer_url.trim_end_matches('/');
        let discovery_url = format!("{issuer}/.well-known/openid-configuration");

        let discovery: Discovery = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OidcAuthError::Jwks {
                reason: format!("discovery {discovery_url}: {e}"),
            })?
            .json()
            .await
            .map_err(|e| OidcAuthError::Jwks {
                reason: format!("discovery decode: {e}"),
            })?;

        let jwks: Jwks = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OidcAuthError::Jwks {
                reason: format!("jwks {}: {e}", discovery.jwks_uri),
            })?
            .json()
            .await
            .map_err(|e| OidcAuthError::Jwks {
                reason: format!("jwks decode: {e}"),
            })?;

        let mut keys = HashMap::new();
        for key in jwks.keys {
            if key.kty != "RSA" || key.use_.as_deref().is_some_and(|u| u != "sig") {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (key.kid, key.n, key.e) else {
                continue;
            };
            let decoding =
                DecodingKey::from_rsa_components(&n, &e).map_err(|e| OidcAuthError::Jwks {
                    reason: format!("unusable jwk {kid}: {e}"),
                })?;
            keys.insert(kid, decoding);
        }
        if keys.is_empty() {
            return Err(OidcAuthError::Jwks {
                reason: "no usable RSA signing keys".into(),
            });
        }
        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct Discovery {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

// ---------------------------------------------------------------------------
// Claim checks
// ---------------------------------------------------------------------------

/// Post-signature claim checks: audience intersection, required claims,
/// groups, and username derivation.
fn check_claims(
    claims: &serde_json::Value,
    options: &OidcOptions,
) -> Result<String, OidcAuthError> {
    if options.audiences.len() > 1 {
        let token_auds = audience_values(claims);
        if !token_auds
            .iter()
            .any(|aud| options.audiences.iter().any(|allowed| allowed == aud))
        {
            return Err(OidcAuthError::Audience);
        }
    }

    for (key, expected) in &options.required_claims {
        match claims.get(key).and_then(|v| v.as_str()) {
            Some(actual) if actual == expected => {}
            _ => {
                return Err(OidcAuthError::RequiredClaim { key: key.clone() });
            }
        }
    }

    if !options.allowed_groups.is_empty() {
        let groups: Vec<&str> = claims
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|g| g.as_str()).collect())
            .unwrap_or_default();
        if !groups
            .iter()
            .any(|g| options.allowed_groups.iter().any(|allowed| allowed == g))
        {
            return Err(OidcAuthError::Group);
        }
    }

    derive_username(claims, options.username_claim_key.as_deref())
}

fn audience_values(claims: &serde_json::Value) -> Vec<String> {
    match claims.get("aud") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// The configured claim, with the standard fallback chain when it is empty.
fn derive_username(
    claims: &serde_json::Value,
    claim_key: Option<&str>,
) -> Result<String, OidcAuthError> {
    let non_empty = |key: &str| {
        claims
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    if let Some(username) = non_empty(claim_key.unwrap_or("sub")) {
        return Ok(username);
    }
    USERNAME_FALLBACK
        .iter()
        .find_map(|key| non_empty(key))
        .ok_or(OidcAuthError::NoUsername)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
