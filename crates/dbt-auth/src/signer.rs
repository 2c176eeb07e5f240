// SPDX-License-Identifier: MIT OR Apache-2.0
//! The signing capability behind SSH JWTs.
//!
//! [`JwtSigner`] is the seam that keeps the JWT codec ignorant of where key
//! material lives: the production implementation talks to an SSH agent
//! ([`crate::agent::AgentSigner`]), while [`LocalKeySigner`] signs with an
//! unencrypted OpenSSH private key and doubles as the test substitute.

use crate::AuthError;
use async_trait::async_trait;
use signature::Signer as _;
use ssh_key::{PrivateKey, PublicKey, Signature};

/// Something that can produce SSH signatures for one public key.
#[async_trait]
pub trait JwtSigner: Send + Sync {
    /// The public key signatures will verify against.
    fn public_key(&self) -> &PublicKey;

    /// Sign `data`, returning an SSH wire signature.
    async fn sign(&self, data: &[u8]) -> Result<Signature, AuthError>;
}

/// Signer backed by an in-process OpenSSH private key.
pub struct LocalKeySigner {
    key: PrivateKey,
    public: PublicKey,
}

impl LocalKeySigner {
    /// Parse an unencrypted OpenSSH private key (PEM).
    pub fn from_openssh(pem: &str) -> Result<Self, AuthError> {
        let key = PrivateKey::from_openssh(pem).map_err(|e| AuthError::BadPublicKey {
            reason: e.to_string(),
        })?;
        if key.is_encrypted() {
            return Err(AuthError::BadPublicKey {
                reason: "private key is encrypted; use the ssh agent instead".into(),
            });
        }
        let public = key.public_key().clone();
        Ok(Self { key, public })
    }
}

#[async_trait]
impl JwtSigner for LocalKeySigner {
    fn public_key(&self) -> &PublicKey {
        &self.public
    }

    async fn sign(&self, data: &[u8]) -> Result<Signature, AuthError> {
        self.key.try_sign(data).map_err(|e| AuthError::Agent {
            reason: format!("local key signing failed: {e}"),
        })
    }
}
