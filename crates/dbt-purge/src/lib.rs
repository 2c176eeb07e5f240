// SPDX-License-Identifier: MIT OR Apache-2.0
//! Version retention and deletion.
//!
//! The engine fetches `{version, modifiedAt}` metadata from the repository
//! server's JSON API, computes the deletion set under an
//! `(olderThan, keep)` policy, and issues one DELETE per doomed version.
//! Planning is pure and separated from execution so callers can show the
//! plan, warn, and confirm before anything is removed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dbt_core::{VersionInfo, TOOLS_PREFIX};
use dbt_transport::{Transport, TransportError};
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the purge engine.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The version metadata API returned an undecodable payload.
    #[error("cannot decode version metadata from {url}")]
    Decode {
        /// The API URL.
        url: String,
        /// Parser detail.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Retention policy: keep the newest `keep` versions, then keep anything
/// younger than `older_than`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    /// Age cutoff; `None` (or zero) makes every non-protected version
    /// deletable.
    pub older_than: Option<Duration>,
    /// Number of newest versions that are always protected.
    pub keep: usize,
}

/// The result of planning a purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgePlan {
    /// The tool being purged.
    pub tool: String,
    /// Every published version, newest first.
    pub all_versions: Vec<VersionInfo>,
    /// The versions that will be deleted, newest first.
    pub deletions: Vec<VersionInfo>,
}

impl PurgePlan {
    /// `true` when the plan removes every published version.
    pub fn is_full_purge(&self) -> bool {
        !self.all_versions.is_empty() && self.deletions.len() == self.all_versions.len()
    }
}

/// Compute the deletion set for a policy.
///
/// Versions are ordered newest-first by semantic version; the first `keep`
/// are protected; of the rest, anything modified at or after
/// `now - older_than` survives.
pub fn deletion_set(
    mut versions: Vec<VersionInfo>,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<VersionInfo> {
    versions.sort_by(|a, b| b.version.cmp(&a.version));

    let candidates = versions.into_iter().skip(policy.keep);

    match policy.older_than.filter(|d| !d.is_zero()) {
        Some(age) => {
            // A cutoff that underflows the calendar means nothing qualifies.
            let cutoff = ChronoDuration::from_std(age)
                .ok()
                .and_then(|d| now.checked_sub_signed(d));
            match cutoff {
                Some(cutoff) => candidates.filter(|v| v.modified_at < cutoff).collect(),
                None => Vec::new(),
            }
        }
        None => candidates.collect(),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Plans and executes purges against one repository server.
pub struct PurgeEngine {
    transport: Transport,
    server_base: String,
}

impl PurgeEngine {
    /// Create an engine for a server base URL (the URL `serverRoot` is
    /// published under, without any repository prefix).
    pub fn new(transport: Transport, server_base: impl Into<String>) -> Self {
        let mut server_base = server_base.into();
        while server_base.ends_with('/') {
            server_base.pop();
        }
        Self {
            transport,
            server_base,
        }
    }

    fn versions_api_url(&self, tool: &str) -> String {
        format!("{}/-/api/tools/{tool}/versions", self.server_base)
    }

    fn version_url(&self, tool: &str, info: &VersionInfo) -> String {
        format!(
            "{}/{TOOLS_PREFIX}/{tool}/{}",
            self.server_base, info.version
        )
    }

    /// Fetch `{version, modifiedAt}` metadata for a tool.
    pub async fn fetch_versions(&self, tool: &str) -> Result<Vec<VersionInfo>, PurgeError> {
        let url = self.versions_api_url(tool);
        let body = self.transport.fetch_bytes(&url).await?;
        serde_json::from_slice(&body).map_err(|source| PurgeError::Decode { url, source })
    }

    /// Build a purge plan for `tool` under `policy`.
    ///
    /// Passing `all = true` marks every version for deletion regardless of
    /// the policy.
    pub async fn plan(
        &self,
        tool: &str,
        policy: RetentionPolicy,
        all: bool,
    ) -> Result<PurgePlan, PurgeError> {
        let mut versions = self.fetch_versions(tool).await?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));

        let deletions = if all {
            versions.clone()
        } else {
            deletion_set(versions.clone(), policy, Utc::now())
        };

        Ok(PurgePlan {
            tool: tool.to_string(),
            all_versions: versions,
            deletions,
        })
    }

    /// Delete every version in the plan. Returns the deleted versions.
    pub async fn execute(&self, plan: &PurgePlan) -> Result<Vec<VersionInfo>, PurgeError> {
        let mut deleted = Vec::with_capacity(plan.deletions.len());
        for info in &plan.deletions {
            let url = self.version_url(&plan.tool, info);
            self.transport.delete(&url).await?;
            info!(tool = %plan.tool, version = %info.version, "purged");
            deleted.push(info.clone());
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn info(version: &str, age_days: i64, now: DateTime<Utc>) -> VersionInfo {
        VersionInfo {
            version: version.parse().unwrap(),
            modified_at: now - ChronoDuration::days(age_days),
        }
    }

    fn days(n: u64) -> Duration {
        Duration::from_secs(n * 24 * 3600)
    }

    /// Five versions at ages 1, 7, 30, 60, 90 days, newest version youngest.
    fn five_versions(now: DateTime<Utc>) -> Vec<VersionInfo> {
        vec![
            info("1.4.0", 1, now),
            info("1.3.0", 7, now),
            info("1.2.0", 30, now),
            info("1.1.0", 60, now),
            info("1.0.0", 90, now),
        ]
    }

    #[test]
    fn keep_protects_newest_and_age_prunes_the_rest() {
        let now = Utc::now();
        let doomed = deletion_set(
            five_versions(now),
            RetentionPolicy {
                older_than: Some(days(45)),
                keep: 4,
            },
            now,
        );
        let names: Vec<String> = doomed.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(names, vec!["1.0.0"]);
    }

    #[test]
    fn zero_older_than_deletes_all_non_protected() {
        let now = Utc::now();
        let doomed = deletion_set(
            five_versions(now),
            RetentionPolicy {
                older_than: None,
                keep: 2,
            },
            now,
        );
        let names: Vec<String> = doomed.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(names, vec!["1.2.0", "1.1.0", "1.0.0"]);
    }

    #[test]
    fn protection_is_by_semver_not_by_age() {
        let now = Utc::now();
        // The newest semver is the *oldest* file; keep=1 must protect it.
        let versions = vec![info("2.0.0", 90, now), info("1.0.0", 1, now)];
        let doomed = deletion_set(
            versions,
            RetentionPolicy {
                older_than: None,
                keep: 1,
            },
            now,
        );
        let names: Vec<String> = doomed.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(names, vec!["1.0.0"]);
    }

    #[test]
    fn young_versions_survive_the_cutoff() {
        let now = Utc::now();
        let doomed = deletion_set(
            five_versions(now),
            RetentionPolicy {
                older_than: Some(days(45)),
                keep: 0,
            },
            now,
        );
        let names: Vec<String> = doomed.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(names, vec!["1.1.0", "1.0.0"]);
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(deletion_set(vec![], RetentionPolicy::default(), Utc::now()).is_empty());
    }

    #[test]
    fn full_purge_detection() {
        let now = Utc::now();
        let all = five_versions(now);
        let plan = PurgePlan {
            tool: "catalog".into(),
            all_versions: all.clone(),
            deletions: all,
        };
        assert!(plan.is_full_purge());

        let partial = PurgePlan {
            tool: "catalog".into(),
            all_versions: five_versions(now),
            deletions: vec![],
        };
        assert!(!partial.is_full_purge());
    }

    #[tokio::test]
    async fn plan_fetches_metadata_from_the_api() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let body = serde_json::to_string(&five_versions(now)).unwrap();
        Mock::given(method("GET"))
            .and(path("/-/api/tools/catalog/versions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/json"),
            )
            .mount(&server)
            .await;

        let engine = PurgeEngine::new(Transport::anonymous(), server.uri());
        let plan = engine
            .plan(
                "catalog",
                RetentionPolicy {
                    older_than: Some(days(45)),
                    keep: 4,
                },
                false,
            )
            .await
            .unwrap();

        assert_eq!(plan.all_versions.len(), 5);
        assert_eq!(plan.deletions.len(), 1);
        assert_eq!(plan.deletions[0].version.to_string(), "1.0.0");
        assert!(!plan.is_full_purge());
    }

    #[tokio::test]
    async fn all_flag_dooms_every_version() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let body = serde_json::to_string(&five_versions(now)).unwrap();
        Mock::given(method("GET"))
            .and(path("/-/api/tools/catalog/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let engine = PurgeEngine::new(Transport::anonymous(), server.uri());
        let plan = engine
            .plan("catalog", RetentionPolicy::default(), true)
            .await
            .unwrap();
        assert!(plan.is_full_purge());
    }

    #[tokio::test]
    async fn execute_deletes_each_doomed_version() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/dbt-tools/catalog/1.0.0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/dbt-tools/catalog/1.1.0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let now = Utc::now();
        let plan = PurgePlan {
            tool: "catalog".into(),
            all_versions: five_versions(now),
            deletions: vec![info("1.1.0", 60, now), info("1.0.0", 90, now)],
        };

        let engine = PurgeEngine::new(Transport::anonymous(), server.uri());
        let deleted = engine.execute(&plan).await.unwrap();
        assert_eq!(deleted.len(), 2);
    }

    #[tokio::test]
    async fn undecodable_metadata_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/-/api/tools/catalog/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let engine = PurgeEngine::new(Transport::anonymous(), server.uri());
        let err = engine
            .plan("catalog", RetentionPolicy::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PurgeError::Decode { .. }));
    }
}
