// SPDX-License-Identifier: MIT OR Apache-2.0
//! Target platform naming.
//!
//! Repository paths use the release-artifact naming convention
//! (`linux/amd64`, `darwin/arm64`), so the host triple's names are mapped
//! before building URLs.

/// The operating-system segment of an artifact path for this host.
pub fn os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// The architecture segment of an artifact path for this host.
pub fn arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
