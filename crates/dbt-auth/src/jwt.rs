// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SSH-signed JWT codec.
//!
//! Tokens are compact JWS: `base64url(header).base64url(claims).base64url
//! (ssh-wire-signature)`. The header `alg` names the SSH signature algorithm
//! (`ssh-ed25519`, `rsa-sha2-256`, …) and the signature covers the first two
//! segments, exactly as RFC 7515 prescribes. Verification is done against an
//! OpenSSH public key supplied by the caller; the token itself is never
//! trusted to name its own key.

use crate::signer::JwtSigner;
use crate::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use signature::Verifier as _;
use ssh_encoding::{Decode, Encode};
use ssh_key::{Algorithm, PublicKey, Signature};

/// How long a freshly minted token stays valid.
///
/// Replay exposure is bounded by this window; the server keeps no nonce
/// store.
pub const TOKEN_LIFETIME_SECS: i64 = 60;

/// Clock-skew allowance applied to `iat` and `exp`.
const LEEWAY_SECS: i64 = 5;

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Claims carried by an SSH-signed JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshJwtClaims {
    /// The authenticating user name.
    pub sub: String,
    /// The repository domain the token is scoped to.
    pub aud: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Canonical form of the signing public key, for diagnostics.
    pub pubkey: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Canonical `algo base64` form of a public key, comment dropped.
pub fn canonical_pubkey(key: &PublicKey) -> String {
    PublicKey::new(key.key_data().clone(), "")
        .to_openssh()
        .unwrap_or_default()
}

fn signature_algorithm(key: &PublicKey) -> String {
    match key.algorithm() {
        // Agents are asked for SHA-256 RSA signatures, never SHA-1.
        Algorithm::Rsa { .. } => "rsa-sha2-256".to_string(),
        other => other.as_str().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Mint a token for `username` scoped to `audience`.
pub async fn sign_token(
    signer: &dyn JwtSigner,
    username: &str,
    audience: &str,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = SshJwtClaims {
        sub: username.to_string(),
        aud: audience.to_string(),
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
        pubkey: canonical_pubkey(signer.public_key()),
    };
    sign_claims(signer, &claims).await
}

/// Sign an explicit claim set. Split out so tests can mint expired tokens.
pub async fn sign_claims(
    signer: &dyn JwtSigner,
    claims: &SshJwtClaims,
) -> Result<String, AuthError> {
    let header = Header {
        alg: signature_algorithm(signer.public_key()),
        typ: "JWT".to_string(),
    };
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).map_err(json_err)?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).map_err(json_err)?);
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signature = signer.sign(signing_input.as_bytes()).await?;
    let mut wire = Vec::with_capacity(signature.encoded_len().unwrap_or(128));
    signature.encode(&mut wire).map_err(|e| AuthError::Token {
        reason: format!("signature encoding failed: {e}"),
    })?;

    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(&wire)
    ))
}

fn json_err(e: serde_json::Error) -> AuthError {
    AuthError::Token {
        reason: format!("claims serialization failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Decode the claims without verifying anything.
///
/// The server needs the subject before it can look up the user's public key;
/// nothing read here may be trusted until [`verify_token`] has passed.
pub fn unverified_claims(token: &str) -> Result<SshJwtClaims, AuthError> {
    let (_, claims, _) = split(token)?;
    decode_claims(claims)
}

/// Verify a token against an OpenSSH public key (authorized-keys line).
///
/// Checks, in order: structure, signature, audience, and time validity.
/// Returns the verified claims.
pub fn verify_token(
    token: &str,
    authorized_key: &str,
    expected_audience: &str,
) -> Result<SshJwtClaims, AuthError> {
    let (header_b64, claims_b64, sig_b64) = split(token)?;

    let header: Header = serde_json::from_slice(&decode_segment(header_b64)?)
        .map_err(|_| bad("malformed header"))?;
    if header.typ != "JWT" {
        return Err(bad("unexpected token type"));
    }

    let key = PublicKey::from_openssh(authorized_key).map_err(|e| AuthError::BadPublicKey {
        reason: e.to_string(),
    })?;

    let wire = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| bad("signature is not base64url"))?;
    let mut reader = wire.as_slice();
    let signature = Signature::decode(&mut reader).map_err(|_| bad("malformed signature"))?;

    if signature.algorithm().as_str() != header.alg {
        return Err(bad("header algorithm does not match signature"));
    }

    let signing_input = format!("{header_b64}.{claims_b64}");
    key.key_data()
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| bad("signature verification failed"))?;

    let claims = decode_claims(claims_b64)?;

    if claims.aud != expected_audience {
        return Err(bad("audience mismatch"));
    }

    let now = Utc::now().timestamp();
    if claims.exp <= now - LEEWAY_SECS {
        return Err(bad("token expired"));
    }
    if claims.iat > now + LEEWAY_SECS {
        return Err(bad("token issued in the future"));
    }

    Ok(claims)
}

fn split(token: &str) -> Result<(&str, &str, &str), AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => Ok((h, c, s)),
        _ => Err(bad("expected three dot-separated segments")),
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| bad("segment is not base64url"))
}

fn decode_claims(claims_b64: &str) -> Result<SshJwtClaims, AuthError> {
    serde_json::from_slice(&decode_segment(claims_b64)?).map_err(|_| bad("malformed claims"))
}

fn bad(reason: &str) -> AuthError {
    AuthError::Token {
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
