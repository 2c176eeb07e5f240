// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request authorization for the dbt client, and the SSH-JWT codec shared
//! with the repository server.
//!
//! The pieces, in the order a request sees them:
//!
//! 1. [`resolve`] turns configured credentials (literal, file path, or shell
//!    hook) into strings.
//! 2. [`domain`] extracts the bare repository domain used as JWT audience.
//! 3. [`signer`] abstracts "something that can sign bytes with an SSH key":
//!    normally the SSH agent ([`agent::AgentSigner`]), or a private key file.
//! 4. [`jwt`] encodes and verifies the SSH-signed JWT itself.
//! 5. [`headers`] assembles the final `Authorization` / `Token` headers for
//!    an outbound request.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod domain;
pub mod headers;
pub mod jwt;
pub mod resolve;
pub mod signer;

pub use domain::bare_domain;
pub use headers::{HeaderSource, NoAuth, ProfileAuthorizer, TokenProvider};
pub use jwt::{SshJwtClaims, sign_token, unverified_claims, verify_token};
pub use signer::{JwtSigner, LocalKeySigner};

use std::path::PathBuf;

/// Header carrying the SSH-agent-signed JWT.
pub const TOKEN_HEADER: &str = "Token";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while resolving credentials or producing auth material.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A shell hook could not be spawned or exited non-zero.
    #[error("credential hook '{command}' failed: {detail}")]
    Hook {
        /// The configured hook command.
        command: String,
        /// What went wrong.
        detail: String,
    },

    /// A credential file could not be read.
    #[error("failed to read credential file {path}")]
    CredentialFile {
        /// The configured path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A repository URL had no extractable host.
    #[error("cannot derive an audience domain from repository url '{url}'")]
    BadRepositoryUrl {
        /// The offending URL.
        url: String,
    },

    /// An OpenSSH public key failed to parse.
    #[error("invalid OpenSSH public key: {reason}")]
    BadPublicKey {
        /// Parser detail.
        reason: String,
    },

    /// Talking to the SSH agent failed.
    #[error("ssh agent failure: {reason}")]
    Agent {
        /// What the agent (or socket) did.
        reason: String,
    },

    /// A JWT was structurally invalid or failed verification.
    #[error("invalid token: {reason}")]
    Token {
        /// What check failed.
        reason: String,
    },

    /// An upstream token provider (OIDC exchange) failed.
    #[error("token provider failure: {reason}")]
    Provider {
        /// Provider detail.
        reason: String,
    },
}
