// SPDX-License-Identifier: MIT OR Apache-2.0
//! Strict three-part semantic versions.
//!
//! Tool versions in the repository are always bare numeric triples
//! (`major.minor.patch`). Pre-release tags, build metadata, and partial
//! versions are rejected up front; everything downstream can then rely on
//! [`semver`]'s total order without ever seeing a pre-release.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors produced when parsing a [`ToolVersion`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    /// The string did not have exactly three dot-separated parts.
    #[error("version '{input}' is not a three-part semantic version")]
    Shape {
        /// The offending input.
        input: String,
    },

    /// One of the parts was not a base-10 integer.
    #[error("version '{input}' has a non-numeric component '{part}'")]
    NotNumeric {
        /// The offending input.
        input: String,
        /// The component that failed to parse.
        part: String,
    },
}

/// A strict `major.minor.patch` version as published in the repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolVersion(Version);

impl ToolVersion {
    /// Construct from raw components.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// `true` when `self` sorts strictly after `other`.
    ///
    /// Equal versions are not newer than each other.
    pub fn newer_than(&self, other: &ToolVersion) -> bool {
        self.0 > other.0
    }

    /// The newest of a set of versions, or `None` for an empty set.
    pub fn latest_of<I>(versions: I) -> Option<ToolVersion>
    where
        I: IntoIterator<Item = ToolVersion>,
    {
        versions
            .into_iter()
            .fold(None, |best, v| match best {
                Some(b) if !v.newer_than(&b) => Some(b),
                _ => Some(v),
            })
    }

    /// `true` when `s` parses as a strict numeric triple.
    ///
    /// Used to filter directory listings, where non-version entries
    /// (readmes, icons, install scripts) are expected and ignored.
    pub fn is_valid(s: &str) -> bool {
        s.parse::<ToolVersion>().is_ok()
    }
}

/// A published version paired with its directory's modification time.
///
/// This is the unit of the `/-/api/tools/{name}/versions` metadata API and
/// the input to age-based retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// The version.
    pub version: ToolVersion,
    /// When the version directory was last modified.
    pub modified_at: DateTime<Utc>,
}

impl FromStr for ToolVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::Shape { input: s.into() });
        }
        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            // Leading '+' / '-' and empty components all fail here.
            *slot = part
                .parse::<u64>()
                .map_err(|_| VersionError::NotNumeric {
                    input: s.into(),
                    part: (*part).into(),
                })?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ToolVersion> for String {
    fn from(v: ToolVersion) -> String {
        v.to_string()
    }
}
