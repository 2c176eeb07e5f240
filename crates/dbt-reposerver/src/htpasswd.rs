// SPDX-License-Identifier: MIT OR Apache-2.0
//! htpasswd-file verification for HTTP Basic.
//!
//! Supported entry formats are `{SHA}` (base64 SHA-1, Apache's `htpasswd -s`)
//! and plaintext. bcrypt and MD5-crypt rows are recognized but rejected as
//! unsupported rather than silently failing open. All comparisons are
//! constant-time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Parsed htpasswd entries, user → password field.
#[derive(Debug)]
pub struct Htpasswd {
    entries: HashMap<String, String>,
}

impl Htpasswd {
    /// Load and parse an htpasswd file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse htpasswd content: one `user:hash` per line, `#` comments and
    /// blank lines skipped.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once(':'))
            .map(|(user, hash)| (user.to_string(), hash.to_string()))
            .collect();
        Self { entries }
    }

    /// Verify a username/password pair.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let Some(stored) = self.entries.get(user) else {
            return false;
        };

        if let Some(encoded) = stored.strip_prefix("{SHA}") {
            let digest = Sha1::digest(password.as_bytes());
            let computed = BASE64.encode(digest);
            return computed.as_bytes().ct_eq(encoded.as_bytes()).into();
        }

        if stored.starts_with("$2") || stored.starts_with("$apr1$") {
            warn!(user, "htpasswd entry uses an unsupported hash format");
            return false;
        }

        stored.as_bytes().ct_eq(password.as_bytes()).into()
    }
}
