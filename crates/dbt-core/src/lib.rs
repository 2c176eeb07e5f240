// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared primitives for the dbt distribution fabric.
//!
//! This crate holds the pieces every other crate leans on: strict semantic
//! version triples ([`ToolVersion`]), hex-encoded content digests, duration
//! parsing with day/week suffixes, and target-platform naming.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod digest;
pub mod duration;
pub mod platform;
pub mod version;

pub use digest::{md5_hex, sha1_hex, sha256_hex, sha256_hex_file};
pub use duration::parse_duration;
pub use version::{ToolVersion, VersionInfo};

/// Repository prefix under which dbt's own release artifacts live.
pub const DBT_PREFIX: &str = "dbt";

/// Repository prefix under which distributed tools live.
pub const TOOLS_PREFIX: &str = "dbt-tools";

/// File name of the trust store, both in the repository and on disk.
pub const TRUSTSTORE_FILENAME: &str = "truststore";

/// The version string baked into this build.
///
/// Release builds inject the tag via the `DBT_VERSION` environment variable
/// at compile time; development builds fall back to the crate version.
pub fn version() -> &'static str {
    match option_env!("DBT_VERSION") {
        Some(v) => v,
        None => env!("CARGO_PKG_VERSION"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!version().is_empty());
    }

    #[test]
    fn repository_prefixes() {
        assert_eq!(DBT_PREFIX, "dbt");
        assert_eq!(TOOLS_PREFIX, "dbt-tools");
        assert_eq!(TRUSTSTORE_FILENAME, "truststore");
    }
}
