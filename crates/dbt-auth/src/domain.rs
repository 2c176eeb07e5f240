// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audience-domain extraction.

use crate::AuthError;
use url::Url;

/// Extract the bare domain of a repository URL for use as a JWT audience.
///
/// The scheme, any leading `www.`, the port, and the path are all dropped:
/// `https://www.repo.example.com:8443/dbt` becomes `repo.example.com`.
pub fn bare_domain(repository_url: &str) -> Result<String, AuthError> {
    let parsed = Url::parse(repository_url).map_err(|_| AuthError::BadRepositoryUrl {
        url: repository_url.into(),
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AuthError::BadRepositoryUrl {
            url: repository_url.into(),
        })?;
    Ok(host.strip_prefix("www.").unwrap_or(host).to_string())
}
