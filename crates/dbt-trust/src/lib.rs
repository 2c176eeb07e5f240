// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trust store handling and detached OpenPGP signature verification.
//!
//! A trust store is a single file of concatenated armored public key blocks.
//! Each block is parsed into its own keyring and a detached signature is
//! accepted as soon as *any* block verifies it. Blocks are never merged into
//! one combined keyring: some verifier stacks only consult the first key of a
//! merged ring, which silently un-trusts every other publisher.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use sequoia_openpgp as openpgp;

use openpgp::Cert;
use openpgp::KeyHandle;
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::parse::stream::{
    DetachedVerifierBuilder, GoodChecksum, MessageLayer, MessageStructure, VerificationHelper,
};
use openpgp::policy::StandardPolicy;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Armor trailer that terminates one public key block.
const END_OF_BLOCK: &str = "-----END PGP PUBLIC KEY BLOCK-----";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while loading a trust store or verifying a signature.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Reading the trust store, signature, or target failed.
    #[error("failed to read {path}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The trust store contained no armored key blocks.
    #[error("trust store {path} contains no public key blocks")]
    EmptyStore {
        /// The trust store path.
        path: PathBuf,
    },

    /// A key block failed to parse.
    #[error("trust store block {index} is not a valid public key block: {reason}")]
    MalformedBlock {
        /// Zero-based index of the block inside the store.
        index: usize,
        /// Parser detail.
        reason: String,
    },

    /// The signature parsed but no trust-store block accepts it.
    #[error("signature was not produced by any trusted signing entity")]
    UnverifiedSigningEntity,
}

// ---------------------------------------------------------------------------
// TrustStore
// ---------------------------------------------------------------------------

/// An ordered set of independent keyrings, one per armored block.
#[derive(Debug)]
pub struct TrustStore {
    blocks: Vec<Vec<Cert>>,
}

impl TrustStore {
    /// Load a trust store from a file of concatenated armored key blocks.
    pub fn load(path: &Path) -> Result<Self, TrustError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrustError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_armored(&raw)?;
        if store.blocks.is_empty() {
            return Err(TrustError::EmptyStore {
                path: path.to_path_buf(),
            });
        }
        Ok(store)
    }

    /// Parse concatenated armored key blocks.
    pub fn from_armored(raw: &str) -> Result<Self, TrustError> {
        let mut blocks = Vec::new();
        for (index, text) in split_armored_blocks(raw).into_iter().enumerate() {
            let malformed = |e: anyhow::Error| TrustError::MalformedBlock {
                index,
                reason: e.to_string(),
            };
            let certs: Vec<Cert> = CertParser::from_bytes(text.as_bytes())
                .map_err(malformed)?
                .collect::<openpgp::Result<Vec<Cert>>>()
                .map_err(malformed)?;
            blocks.push(certs);
        }
        Ok(Self { blocks })
    }

    /// Number of independent key blocks in the store.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// `true` when the store has no key blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Verify a detached armored signature over `target`.
    ///
    /// Each key block is tried in order; the first block whose keyring
    /// validates the signature wins. I/O failures abort immediately, a
    /// signature no block accepts yields
    /// [`TrustError::UnverifiedSigningEntity`].
    pub fn verify_detached(&self, signature: &Path, target: &Path) -> Result<(), TrustError> {
        let sig = std::fs::read(signature).map_err(|source| TrustError::Io {
            path: signature.to_path_buf(),
            source,
        })?;
        let data = std::fs::read(target).map_err(|source| TrustError::Io {
            path: target.to_path_buf(),
            source,
        })?;

        for (index, certs) in self.blocks.iter().enumerate() {
            if verify_with_keyring(certs, &sig, &data) {
                debug!(block = index, target = %target.display(), "signature verified");
                return Ok(());
            }
        }
        Err(TrustError::UnverifiedSigningEntity)
    }
}

/// Convenience wrapper: load the store at `truststore` and verify
/// `<target>` against `<signature>`.
pub fn verify_file_signature(
    truststore: &Path,
    signature: &Path,
    target: &Path,
) -> Result<(), TrustError> {
    TrustStore::load(truststore)?.verify_detached(signature, target)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Split concatenated armored key blocks on the END trailer.
///
/// Each returned string is one complete armored block including its trailer.
fn split_armored_blocks(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(pos) = rest.find(END_OF_BLOCK) {
        let end = pos + END_OF_BLOCK.len();
        let block = rest[..end].trim_start();
        if !block.is_empty() {
            out.push(block.to_string());
        }
        rest = &rest[end..];
    }
    out
}

/// Check one keyring against a detached signature.
///
/// Verification failure is an expected outcome here (the signer may live in
/// a later block), so every error is mapped to `false`.
fn verify_with_keyring(certs: &[Cert], sig: &[u8], data: &[u8]) -> bool {
    let policy = &StandardPolicy::new();
    let helper = Helper {
        certs: certs.to_vec(),
        good: false,
    };

    let verifier = DetachedVerifierBuilder::from_bytes(sig)
        .and_then(|b| b.with_policy(policy, None, helper));
    let mut verifier = match verifier {
        Ok(v) => v,
        Err(_) => return false,
    };
    if verifier.verify_bytes(data).is_err() {
        return false;
    }
    verifier.into_helper().good
}

struct Helper {
    certs: Vec<Cert>,
    good: bool,
}

impl VerificationHelper for Helper {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.clone())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                if results.iter().any(|r| matches!(r, Ok(GoodChecksum { .. }))) {
                    self.good = true;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn store_splits_into_independent_blocks() {
        let store = TrustStore::load(&fixture("truststore")).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn accepts_signature_from_a_non_first_block() {
        // The signer's key is the second block; a store collapsed into one
        // keyring that only consults the first key would fail here.
        let store = TrustStore::load(&fixture("truststore")).unwrap();
        store
            .verify_detached(&fixture("artifact.bin.asc"), &fixture("artifact.bin"))
            .unwrap();
    }

    #[test]
    fn rejects_signature_with_no_matching_key() {
        let store = TrustStore::load(&fixture("truststore-other")).unwrap();
        let err = store
            .verify_detached(&fixture("artifact.bin.asc"), &fixture("artifact.bin"))
            .unwrap_err();
        assert!(matches!(err, TrustError::UnverifiedSigningEntity));
    }

    #[test]
    fn rejects_tampered_content() {
        let dir = tempfile::tempdir().unwrap();
        let tampered = dir.path().join("artifact.bin");
        std::fs::write(&tampered, b"not the payload that was signed\n").unwrap();

        let store = TrustStore::load(&fixture("truststore")).unwrap();
        let err = store
            .verify_detached(&fixture("artifact.bin.asc"), &tampered)
            .unwrap_err();
        assert!(matches!(err, TrustError::UnverifiedSigningEntity));
    }

    #[test]
    fn missing_signature_is_an_io_error() {
        let store = TrustStore::load(&fixture("truststore")).unwrap();
        let err = store
            .verify_detached(&fixture("no-such.asc"), &fixture("artifact.bin"))
            .unwrap_err();
        assert!(matches!(err, TrustError::Io { .. }));
    }

    #[test]
    fn missing_store_is_an_io_error() {
        let err = TrustStore::load(&fixture("no-such-store")).unwrap_err();
        assert!(matches!(err, TrustError::Io { .. }));
    }

    #[test]
    fn empty_store_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truststore");
        std::fs::write(&path, "").unwrap();
        let err = TrustStore::load(&path).unwrap_err();
        assert!(matches!(err, TrustError::EmptyStore { .. }));
    }

    #[test]
    fn block_splitting_tolerates_surrounding_whitespace() {
        let raw = std::fs::read_to_string(fixture("truststore")).unwrap();
        let padded = format!("\n\n{raw}\n\n");
        let store = TrustStore::from_armored(&padded).unwrap();
        assert_eq!(store.len(), 2);
    }
}
