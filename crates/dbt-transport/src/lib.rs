// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transport adapter: uniform read/write/delete/list over HTTP(S) and S3.
//!
//! Every operation takes a full URL. URLs of the shape
//! `https://<bucket>.s3.<region>.amazonaws.com/<key>` are routed to the
//! object-store backend; everything else goes over plain HTTP with the
//! profile's auth headers attached. Callers never know which backend served
//! them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod index;
mod http;
mod s3;

pub use index::{parse_index_names, parse_index_versions};
pub use s3::S3Location;

use dbt_auth::{AuthError, HeaderSource};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Building or sending an HTTP request failed.
    #[error("request to {url} failed")]
    Http {
        /// The request URL.
        url: String,
        /// Transport detail.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// The request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A local file operation failed.
    #[error("file operation on {path} failed")]
    Io {
        /// The local path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An S3 operation failed.
    #[error("s3 operation on {url} failed: {reason}")]
    S3 {
        /// The request URL.
        url: String,
        /// SDK detail.
        reason: String,
    },

    /// Computing auth headers failed.
    #[error("authorization failed")]
    Auth(#[from] AuthError),

    /// The URL could not be parsed.
    #[error("malformed url '{url}'")]
    BadUrl {
        /// The offending URL.
        url: String,
    },
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress-bar settings.
///
/// Byte progress is printed only when explicitly enabled; tests and scripted
/// use keep the default silent behavior. Held per transport instance so
/// suppression never leaks between callers through global state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressOptions {
    /// Draw a byte progress bar for downloads.
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The transport facade.
pub struct Transport {
    http: http::HttpBackend,
    s3: s3::S3Backend,
    progress: ProgressOptions,
}

impl Transport {
    /// Create a transport with the given auth-header source.
    pub fn new(headers: Arc<dyn HeaderSource>, progress: ProgressOptions) -> Self {
        Self {
            http: http::HttpBackend::new(headers),
            s3: s3::S3Backend::new(),
            progress,
        }
    }

    /// Create an unauthenticated transport.
    pub fn anonymous() -> Self {
        Self::new(Arc::new(dbt_auth::NoAuth), ProgressOptions::default())
    }

    /// GET a URL into memory.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.fetch_bytes(&loc).await,
            None => self.http.fetch_bytes(url).await,
        }
    }

    /// GET a URL into a file created with mode 0755.
    ///
    /// A HEAD request sizes the progress bar first; the download itself uses
    /// the long-haul timeout.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        dest: &std::path::Path,
    ) -> Result<(), TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.fetch_to_file(&loc, dest).await,
            None => self.http.fetch_to_file(url, dest, self.progress).await,
        }
    }

    /// HEAD a URL. `false` means a clean 404, anything else ≥ 400 is an
    /// error.
    pub async fn exists(&self, url: &str) -> Result<bool, TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.exists(&loc).await,
            None => self.http.exists(url).await,
        }
    }

    /// List the names under a directory-like URL.
    ///
    /// HTTP URLs are fetched and parsed as an HTML directory index; S3 URLs
    /// use a `delimiter="/"` listing of common prefixes.
    pub async fn list(&self, url: &str) -> Result<Vec<String>, TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.list(&loc).await,
            None => {
                let body = self.http.fetch_bytes(url).await?;
                Ok(parse_index_names(&String::from_utf8_lossy(&body)))
            }
        }
    }

    /// PUT bytes to a URL, sending a SHA-256 checksum header the repository
    /// server verifies before writing.
    pub async fn put(&self, url: &str, body: Vec<u8>) -> Result<(), TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.put(&loc, body).await,
            None => self.http.put(url, body).await,
        }
    }

    /// DELETE a URL.
    pub async fn delete(&self, url: &str) -> Result<(), TransportError> {
        match S3Location::parse(url) {
            Some(loc) => self.s3.delete(&loc).await,
            None => self.http.delete(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn list_parses_the_served_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dbt-tools"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a href="../">../</a><a href="catalog/">catalog/</a><a href="notes.txt">notes.txt</a>"#,
            ))
            .mount(&server)
            .await;

        let names = Transport::anonymous()
            .list(&format!("{}/dbt-tools", server.uri()))
            .await
            .unwrap();
        assert_eq!(names, vec!["catalog"]);
    }

    #[tokio::test]
    async fn non_s3_urls_route_to_http() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = Transport::anonymous();
        assert!(transport
            .exists(&format!("{}/present", server.uri()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_round_trips_through_the_facade() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/victim"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Transport::anonymous()
            .delete(&format!("{}/victim", server.uri()))
            .await
            .unwrap();
    }
}
