// SPDX-License-Identifier: MIT OR Apache-2.0
//! Duration parsing for retention policies.
//!
//! Purge cutoffs are written in day and week granularity (`30d`, `2w`), which
//! the standard-library parser does not speak. [`humantime`] covers the full
//! grammar, including the plain `h`/`m`/`s` suffixes.

use std::time::Duration;

/// Error for an unparseable duration string.
#[derive(Debug, thiserror::Error)]
#[error("invalid duration '{input}': {source}")]
pub struct DurationError {
    /// The offending input.
    pub input: String,
    /// Parser detail.
    #[source]
    source: humantime::DurationError,
}

/// Parse a duration, accepting `s`, `m`, `h` plus the `d` (24 h) and
/// `w` (7 × 24 h) suffixes used by retention policies.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    humantime::parse_duration(s).map_err(|source| DurationError {
        input: s.into(),
        source,
    })
}
