// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3 object-store backend.
//!
//! Bucket and region come from the virtual-hosted URL itself; credentials
//! come from the standard AWS environment variables or, when those are
//! absent, the default provider chain including shared config files.

use crate::TransportError;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// A parsed virtual-hosted S3 URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    /// Bucket name.
    pub bucket: String,
    /// Region extracted from the host.
    pub region: String,
    /// Object key (may be empty for the bucket root).
    pub key: String,
}

impl S3Location {
    /// Parse `https?://<bucket>.s3.<region>.amazonaws.com/<key?>`.
    ///
    /// Returns `None` for anything that is not that shape, which routes the
    /// URL to the HTTP backend instead.
    pub fn parse(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?;
        let rest = host.strip_suffix(".amazonaws.com")?;
        // rest = "<bucket>.s3.<region>"; bucket names may contain dots, so
        // split from the right.
        let (prefix, region) = rest.rsplit_once('.')?;
        let bucket = prefix.strip_suffix(".s3")?;
        if bucket.is_empty() || region.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            key: parsed.path().trim_start_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, self.key
        )
    }
}

/// S3 operations, with one SDK client cached per region.
pub(crate) struct S3Backend {
    clients: Mutex<HashMap<String, Client>>,
}

impl S3Backend {
    pub(crate) fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, region: &str) -> Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = Client::new(&config);
        clients.insert(region.to_string(), client.clone());
        client
    }

    pub(crate) async fn fetch_bytes(&self, loc: &S3Location) -> Result<Vec<u8>, TransportError> {
        let client = self.client(&loc.region).await;
        let object = client
            .get_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .send()
            .await
            .map_err(|e| s3_err(loc, e))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| TransportError::S3 {
                url: loc.url(),
                reason: e.to_string(),
            })?;
        Ok(data.into_bytes().to_vec())
    }

    pub(crate) async fn fetch_to_file(
        &self,
        loc: &S3Location,
        dest: &Path,
    ) -> Result<(), TransportError> {
        let client = self.client(&loc.region).await;
        let object = client
            .get_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .send()
            .await
            .map_err(|e| s3_err(loc, e))?;

        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o755);
        }
        let mut file = opts.open(dest).await.map_err(|source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut body = object.body;
        while let Some(chunk) = body.try_next().await.map_err(|e| TransportError::S3 {
            url: loc.url(),
            reason: e.to_string(),
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|source| TransportError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        file.flush().await.map_err(|source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub(crate) async fn exists(&self, loc: &S3Location) -> Result<bool, TransportError> {
        let client = self.client(&loc.region).await;
        match client
            .head_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().map(|e| e.is_not_found()) == Some(true) => {
                // A bare key miss may still be a logical folder; a non-empty
                // prefix listing counts as present.
                let prefix = format!("{}/", loc.key.trim_end_matches('/'));
                let listed = self.list_prefix(loc, &prefix).await?;
                Ok(!listed.is_empty())
            }
            Err(err) => Err(s3_err(loc, err)),
        }
    }

    pub(crate) async fn list(&self, loc: &S3Location) -> Result<Vec<String>, TransportError> {
        let prefix = match loc.key.trim_end_matches('/') {
            "" => String::new(),
            trimmed => format!("{trimmed}/"),
        };
        self.list_prefix(loc, &prefix).await
    }

    /// Common-prefix listing with `delimiter = "/"`, which materializes the
    /// logical folder structure.
    async fn list_prefix(
        &self,
        loc: &S3Location,
        prefix: &str,
    ) -> Result<Vec<String>, TransportError> {
        let client = self.client(&loc.region).await;
        let response = client
            .list_objects_v2()
            .bucket(&loc.bucket)
            .prefix(prefix)
            .delimiter("/")
            .send()
            .await
            .map_err(|e| s3_err(loc, e))?;

        let names = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .filter_map(|p| {
                p.strip_prefix(prefix)
                    .map(|n| n.trim_end_matches('/').to_string())
            })
            .filter(|n| !n.is_empty())
            .collect();
        debug!(bucket = %loc.bucket, prefix, "listed s3 prefix");
        Ok(names)
    }

    pub(crate) async fn put(&self, loc: &S3Location, body: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client(&loc.region).await;
        client
            .put_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| s3_err(loc, e))?;
        Ok(())
    }

    pub(crate) async fn delete(&self, loc: &S3Location) -> Result<(), TransportError> {
        let client = self.client(&loc.region).await;
        client
            .delete_object()
            .bucket(&loc.bucket)
            .key(&loc.key)
            .send()
            .await
            .map_err(|e| s3_err(loc, e))?;
        Ok(())
    }
}

fn s3_err<E, R>(loc: &S3Location, err: aws_sdk_s3::error::SdkError<E, R>) -> TransportError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let reason = err
        .as_service_error()
        .and_then(|e| e.message().map(String::from))
        .unwrap_or_else(|| format!("{err:?}"));
    TransportError::S3 {
        url: loc.url(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_virtual_hosted_urls() {
        let loc =
            S3Location::parse("https://my-repo.s3.us-east-1.amazonaws.com/dbt-tools/catalog")
                .unwrap();
        assert_eq!(loc.bucket, "my-repo");
        assert_eq!(loc.region, "us-east-1");
        assert_eq!(loc.key, "dbt-tools/catalog");
    }

    #[test]
    fn bucket_names_may_contain_dots() {
        let loc = S3Location::parse("https://repo.example.s3.eu-west-2.amazonaws.com/").unwrap();
        assert_eq!(loc.bucket, "repo.example");
        assert_eq!(loc.region, "eu-west-2");
        assert_eq!(loc.key, "");
    }

    #[test]
    fn plain_http_scheme_is_accepted() {
        assert!(S3Location::parse("http://b.s3.us-west-2.amazonaws.com/k").is_some());
    }

    #[test]
    fn ordinary_urls_are_not_s3() {
        for url in [
            "https://repo.example.com/dbt-tools",
            "https://s3.us-east-1.amazonaws.com/bucket/key",
            "ftp://b.s3.us-east-1.amazonaws.com/k",
            "https://bucket.s3.amazonaws.com/k",
        ] {
            assert!(S3Location::parse(url).is_none(), "parsed {url}");
        }
    }
}
