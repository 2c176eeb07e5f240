// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP(S) backend.

use crate::{ProgressOptions, TransportError};
use dbt_auth::HeaderSource;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Timeout for ordinary requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for artifact downloads and uploads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Checksum header sent with uploads.
const SHA256_HEADER: &str = "X-Checksum-Sha256";

pub(crate) struct HttpBackend {
    short: reqwest::Client,
    long: reqwest::Client,
    headers: Arc<dyn HeaderSource>,
}

impl HttpBackend {
    pub(crate) fn new(headers: Arc<dyn HeaderSource>) -> Self {
        let short = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("default tls backend available");
        let long = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .expect("default tls backend available");
        Self {
            short,
            long,
            headers,
        }
    }

    async fn request(
        &self,
        client: &reqwest::Client,
        method: Method,
        url: &str,
    ) -> Result<RequestBuilder, TransportError> {
        let mut builder = client.request(method, url);
        for (name, value) in self.headers.headers().await? {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, TransportError> {
        let response = builder.send().await.map_err(|source| TransportError::Http {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    pub(crate) async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let builder = self.request(&self.short, Method::GET, url).await?;
        let response = self.send(builder, url).await?;
        let bytes = response.bytes().await.map_err(|source| TransportError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }

    pub(crate) async fn exists(&self, url: &str) -> Result<bool, TransportError> {
        let builder = self.request(&self.short, Method::HEAD, url).await?;
        let response = builder.send().await.map_err(|source| TransportError::Http {
            url: url.to_string(),
            source,
        })?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.as_u16() >= 400 => Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
            _ => Ok(true),
        }
    }

    /// Content length from a HEAD request, for sizing the progress bar.
    async fn content_length(&self, url: &str) -> Result<Option<u64>, TransportError> {
        let builder = self.request(&self.short, Method::HEAD, url).await?;
        let response = self.send(builder, url).await?;
        Ok(response.content_length())
    }

    pub(crate) async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: ProgressOptions,
    ) -> Result<(), TransportError> {
        let total = self.content_length(url).await?;
        debug!(url, dest = %dest.display(), size = ?total, "downloading");

        let builder = self.request(&self.long, Method::GET, url).await?;
        let response = self.send(builder, url).await?;

        let mut file = open_executable(dest).await?;
        let bar = make_bar(progress, total);

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransportError::Http {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| TransportError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
            bar.inc(chunk.len() as u64);
        }
        bar.finish_and_clear();

        file.flush().await.map_err(|source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub(crate) async fn put(&self, url: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let checksum = dbt_core::sha256_hex(&body);
        let builder = self
            .request(&self.long, Method::PUT, url)
            .await?
            .header(SHA256_HEADER, checksum)
            .body(body);
        self.send(builder, url).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<(), TransportError> {
        let builder = self.request(&self.short, Method::DELETE, url).await?;
        self.send(builder, url).await?;
        Ok(())
    }
}

async fn open_executable(dest: &Path) -> Result<tokio::fs::File, TransportError> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o755);
    }
    opts.open(dest).await.map_err(|source| TransportError::Io {
        path: dest.to_path_buf(),
        source,
    })
}

fn make_bar(progress: ProgressOptions, total: Option<u64>) -> ProgressBar {
    if !progress.enabled {
        return ProgressBar::hidden();
    }
    let bar = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(
        ProgressStyle::with_template("{bytes}/{total_bytes} {wide_bar} {eta}")
            .expect("static template"),
    );
    bar
}
