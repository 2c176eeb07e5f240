// SPDX-License-Identifier: MIT OR Apache-2.0
//! Repository client: discovery, download, verification.
//!
//! Paths inside the repository follow the published layout:
//!
//! ```text
//! dbt/<ver>/<os>/<arch>/dbt{,.sha256,.asc}
//! dbt/truststore
//! dbt-tools/<name>/<ver>/<os>/<arch>/<name>{,.sha256,.asc}
//! dbt-tools/<name>/<ver>/description.txt
//! ```
//!
//! Discovery works against any static web server's HTML index (or an S3
//! prefix listing); downloads land as the artifact triple of binary,
//! `.sha256`, and `.asc`, and nothing is ever reported usable until both the
//! checksum and the detached signature have passed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use dbt_core::{sha256_hex_file, ToolVersion};
use dbt_transport::{Transport, TransportError};
use dbt_trust::{TrustError, TrustStore};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sidecar extension carrying the hex SHA-256 of an artifact.
pub const CHECKSUM_EXT: &str = "sha256";

/// Sidecar extension carrying the armored detached signature.
pub const SIGNATURE_EXT: &str = "asc";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Signature verification failed or the trust store is unusable.
    #[error(transparent)]
    Trust(#[from] TrustError),

    /// A local file operation failed.
    #[error("file operation on {path} failed")]
    Io {
        /// The local path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An artifact's content does not match its published checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The local artifact path.
        path: PathBuf,
        /// Digest the repository published.
        expected: String,
        /// Digest computed from the file.
        actual: String,
    },
}

// ---------------------------------------------------------------------------
// Catalog types
// ---------------------------------------------------------------------------

/// One tool as shown by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Tool name.
    pub name: String,
    /// Human-readable description of the latest version, if published.
    pub description: Option<String>,
    /// All published versions, oldest first.
    pub versions: Vec<ToolVersion>,
}

// ---------------------------------------------------------------------------
// RepoClient
// ---------------------------------------------------------------------------

/// Client for one configured repository.
pub struct RepoClient {
    transport: Transport,
    dbt_url: String,
    tools_url: String,
    truststore_url: String,
}

impl RepoClient {
    /// Create a client over an already-authorized transport.
    pub fn new(
        transport: Transport,
        dbt_url: impl Into<String>,
        tools_url: impl Into<String>,
        truststore_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            dbt_url: trim_slash(dbt_url.into()),
            tools_url: trim_slash(tools_url.into()),
            truststore_url: truststore_url.into(),
        }
    }

    /// The underlying transport, for callers issuing raw operations.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Base URL of the dbt release repository.
    pub fn dbt_base_url(&self) -> &str {
        &self.dbt_url
    }

    // -- URLs ------------------------------------------------------------

    /// URL of a tool's version directory listing.
    fn tool_url(&self, tool: &str) -> String {
        format!("{}/{tool}", self.tools_url)
    }

    /// URL of the binary for `(tool, version)` on the given platform.
    pub fn artifact_url(&self, tool: &str, version: &ToolVersion, os: &str, arch: &str) -> String {
        format!("{}/{tool}/{version}/{os}/{arch}/{tool}", self.tools_url)
    }

    /// URL of dbt's own binary for a version and platform.
    pub fn dbt_artifact_url(&self, version: &ToolVersion, os: &str, arch: &str) -> String {
        format!("{}/{version}/{os}/{arch}/dbt", self.dbt_url)
    }

    // -- Discovery -------------------------------------------------------

    /// All tool names published in the tools repository.
    pub async fn fetch_tool_names(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.transport.list(&self.tools_url).await?)
    }

    /// All published versions of a tool.
    pub async fn fetch_tool_versions(&self, tool: &str) -> Result<Vec<ToolVersion>, RepoError> {
        let names = self.transport.list(&self.tool_url(tool)).await?;
        Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
    }

    /// A tool's description, published alongside one version.
    pub async fn fetch_tool_description(
        &self,
        tool: &str,
        version: &ToolVersion,
    ) -> Result<String, RepoError> {
        let url = format!("{}/{tool}/{version}/description.txt", self.tools_url);
        let bytes = self.transport.fetch_bytes(&url).await?;
        Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
    }

    /// Whether a tool is published at all.
    pub async fn tool_exists(&self, tool: &str) -> Result<bool, RepoError> {
        Ok(self.transport.exists(&self.tool_url(tool)).await?)
    }

    /// The newest published version of a tool.
    ///
    /// `None` means "not in this repository", which callers treat as a
    /// degradable condition rather than a failure.
    pub async fn find_latest_version(
        &self,
        tool: &str,
    ) -> Result<Option<ToolVersion>, RepoError> {
        if !self.tool_exists(tool).await? {
            debug!(tool, "tool not present in repository");
            return Ok(None);
        }
        let versions = self.fetch_tool_versions(tool).await?;
        Ok(ToolVersion::latest_of(versions))
    }

    /// The full catalog: every tool with its versions and description.
    pub async fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, RepoError> {
        let mut entries = Vec::new();
        for name in self.fetch_tool_names().await? {
            let mut versions = self.fetch_tool_versions(&name).await?;
            versions.sort();
            let description = match ToolVersion::latest_of(versions.iter().cloned()) {
                Some(latest) => self.fetch_tool_description(&name, &latest).await.ok(),
                None => None,
            };
            entries.push(CatalogEntry {
                name,
                description,
                versions,
            });
        }
        Ok(entries)
    }

    // -- Download --------------------------------------------------------

    /// Download one URL to a local path (created with mode 0755).
    pub async fn fetch_file(&self, url: &str, dest: &Path) -> Result<(), RepoError> {
        Ok(self.transport.fetch_to_file(url, dest).await?)
    }

    /// Download an artifact triple: the binary plus its `.sha256` and
    /// `.asc` sidecars, all into `dest`'s directory.
    pub async fn fetch_artifact_triple(&self, url: &str, dest: &Path) -> Result<(), RepoError> {
        self.fetch_file(url, dest).await?;
        self.fetch_file(
            &format!("{url}.{CHECKSUM_EXT}"),
            &sidecar(dest, CHECKSUM_EXT),
        )
        .await?;
        self.fetch_file(
            &format!("{url}.{SIGNATURE_EXT}"),
            &sidecar(dest, SIGNATURE_EXT),
        )
        .await?;
        info!(url, dest = %dest.display(), "downloaded artifact triple");
        Ok(())
    }

    /// Download the trust store, replacing any existing copy atomically.
    pub async fn fetch_truststore(&self, dest: &Path) -> Result<(), RepoError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RepoError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let bytes = self.transport.fetch_bytes(&self.truststore_url).await?;
        let scratch = dest.with_extension("tmp");
        tokio::fs::write(&scratch, &bytes)
            .await
            .map_err(|source| RepoError::Io {
                path: scratch.clone(),
                source,
            })?;
        tokio::fs::rename(&scratch, dest)
            .await
            .map_err(|source| RepoError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        info!(dest = %dest.display(), "trust store updated");
        Ok(())
    }

    // -- Verification ----------------------------------------------------

    /// Compare a local file's SHA-256 against an expected hex digest.
    pub fn verify_file_checksum(path: &Path, expected_hex: &str) -> Result<(), RepoError> {
        let actual = sha256_hex_file(path).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let expected = expected_hex.trim();
        if actual != expected {
            return Err(RepoError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Whether a local file matches the checksum published for `url`.
    pub async fn verify_file_version(&self, url: &str, local: &Path) -> Result<bool, RepoError> {
        let published = self
            .transport
            .fetch_bytes(&format!("{url}.{CHECKSUM_EXT}"))
            .await?;
        let expected = String::from_utf8_lossy(&published).trim().to_string();
        let actual = sha256_hex_file(local).map_err(|source| RepoError::Io {
            path: local.to_path_buf(),
            source,
        })?;
        Ok(expected == actual)
    }

    /// Verify a local file's detached signature against a trust store.
    pub fn verify_file_signature(truststore: &Path, local: &Path) -> Result<(), RepoError> {
        let store = TrustStore::load(truststore)?;
        store.verify_detached(&sidecar(local, SIGNATURE_EXT), local)?;
        Ok(())
    }
}

/// `<path>.<ext>` next to the artifact.
pub fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(ext);
    path.with_file_name(name)
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dbt_core::sha256_hex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RepoClient {
        let base = server.uri();
        RepoClient::new(
            Transport::anonymous(),
            format!("{base}/dbt"),
            format!("{base}/dbt-tools"),
            format!("{base}/dbt/truststore"),
        )
    }

    async fn mount_index(server: &MockServer, at: &str, hrefs: &[&str]) {
        let body: String = hrefs
            .iter()
            .map(|h| format!(r#"<a href="{h}">{h}</a>"#))
            .collect();
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn tool_names_come_from_the_index() {
        let server = MockServer::start().await;
        mount_index(
            &server,
            "/dbt-tools",
            &["../", "catalog/", "reaper/", "README.html"],
        )
        .await;

        let names = client(&server).fetch_tool_names().await.unwrap();
        assert_eq!(names, vec!["catalog", "reaper"]);
    }

    #[tokio::test]
    async fn versions_are_filtered_and_latest_selected() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/dbt-tools/catalog"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        mount_index(
            &server,
            "/dbt-tools/catalog",
            &["../", "1.2.2/", "1.2.3/", "install_dbt.sh"],
        )
        .await;

        let latest = client(&server)
            .find_latest_version("catalog")
            .await
            .unwrap();
        assert_eq!(latest, Some("1.2.3".parse().unwrap()));
    }

    #[tokio::test]
    async fn absent_tool_yields_none_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/dbt-tools/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(client(&server).find_latest_version("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn description_is_fetched_per_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbt-tools/catalog/1.2.3/description.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Lists the catalog.\n"))
            .mount(&server)
            .await;

        let description = client(&server)
            .fetch_tool_description("catalog", &"1.2.3".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(description, "Lists the catalog.");
    }

    #[tokio::test]
    async fn artifact_triple_lands_side_by_side() {
        let server = MockServer::start().await;
        for (suffix, body) in [("", "binary"), (".sha256", "digest"), (".asc", "sig")] {
            Mock::given(method("HEAD"))
                .and(path(format!(
                    "/dbt-tools/catalog/1.2.3/linux/amd64/catalog{suffix}"
                )))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!(
                    "/dbt-tools/catalog/1.2.3/linux/amd64/catalog{suffix}"
                )))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("catalog");
        let c = client(&server);
        let url = c.artifact_url("catalog", &"1.2.3".parse().unwrap(), "linux", "amd64");
        c.fetch_artifact_triple(&url, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"binary");
        assert_eq!(
            std::fs::read(dir.path().join("catalog.sha256")).unwrap(),
            b"digest"
        );
        assert_eq!(std::fs::read(dir.path().join("catalog.asc")).unwrap(), b"sig");
    }

    #[tokio::test]
    async fn missing_sidecar_fails_the_fetch() {
        let server = MockServer::start().await;
        for m in ["HEAD", "GET"] {
            Mock::given(method(m))
                .and(path("/dbt-tools/catalog/1.2.3/linux/amd64/catalog"))
                .respond_with(ResponseTemplate::new(200).set_body_string("binary"))
                .mount(&server)
                .await;
        }
        // No .sha256 / .asc mocks: wiremock answers 404.

        let dir = tempfile::tempdir().unwrap();
        let c = client(&server);
        let url = c.artifact_url("catalog", &"1.2.3".parse().unwrap(), "linux", "amd64");
        assert!(c
            .fetch_artifact_triple(&url, &dir.path().join("catalog"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn verify_file_version_compares_published_digest() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("catalog");
        std::fs::write(&local, b"current contents").unwrap();

        Mock::given(method("GET"))
            .and(path("/dbt-tools/catalog/1.2.3/linux/amd64/catalog.sha256"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(sha256_hex(b"current contents")),
            )
            .mount(&server)
            .await;

        let c = client(&server);
        let url = c.artifact_url("catalog", &"1.2.3".parse().unwrap(), "linux", "amd64");
        assert!(c.verify_file_version(&url, &local).await.unwrap());

        std::fs::write(&local, b"stale contents").unwrap();
        assert!(!c.verify_file_version(&url, &local).await.unwrap());
    }

    #[test]
    fn checksum_verification_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, b"payload").unwrap();
        let good = sha256_hex(b"payload");

        RepoClient::verify_file_checksum(&file, &good).unwrap();
        RepoClient::verify_file_checksum(&file, &format!("{good}\n")).unwrap();

        let err = RepoClient::verify_file_checksum(&file, "deadbeef").unwrap_err();
        assert!(matches!(err, RepoError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn truststore_download_replaces_atomically() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbt/truststore"))
            .respond_with(ResponseTemplate::new(200).set_body_string("KEYBLOCKS"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("trust").join("truststore");
        client(&server).fetch_truststore(&dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "KEYBLOCKS");
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn catalog_combines_names_descriptions_and_versions() {
        let server = MockServer::start().await;
        mount_index(&server, "/dbt-tools", &["../", "catalog/", "reaper/"]).await;
        mount_index(&server, "/dbt-tools/catalog", &["1.0.0/", "1.1.0/"]).await;
        mount_index(&server, "/dbt-tools/reaper", &["0.2.0/"]).await;
        Mock::given(method("GET"))
            .and(path("/dbt-tools/catalog/1.1.0/description.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Lists the catalog."))
            .mount(&server)
            .await;
        // reaper has no description published; wiremock answers 404.

        let catalog = client(&server).fetch_catalog().await.unwrap();
        assert_eq!(catalog.len(), 2);

        assert_eq!(catalog[0].name, "catalog");
        assert_eq!(catalog[0].description.as_deref(), Some("Lists the catalog."));
        assert_eq!(catalog[0].versions.len(), 2);

        assert_eq!(catalog[1].name, "reaper");
        assert_eq!(catalog[1].description, None);
    }

    #[test]
    fn sidecar_appends_not_replaces_extension() {
        assert_eq!(
            sidecar(Path::new("/x/tool"), "sha256"),
            PathBuf::from("/x/tool.sha256")
        );
        assert_eq!(
            sidecar(Path::new("/x/install.sh"), "asc"),
            PathBuf::from("/x/install.sh.asc")
        );
    }
}
