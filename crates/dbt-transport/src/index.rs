// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTML directory-index parsing.
//!
//! The only contract with the repository is what ordinary static web servers
//! emit: a stream of `<a href="...">` start-tags. Anything that is not a
//! relative directory link (icons, readmes, the parent-directory link) is
//! ignored; version listings additionally require a strict numeric triple.

use dbt_core::ToolVersion;
use regex::Regex;
use std::sync::OnceLock;

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s+[^>]*?href="([^"]+)""#).expect("static regex"))
}

/// Extract directory names from an HTML index page.
///
/// Each `<a href="X/">` whose target is not `../` contributes one name with
/// the trailing slash trimmed. Non-directory links are skipped.
pub fn parse_index_names(html: &str) -> Vec<String> {
    href_re()
        .captures_iter(html)
        .filter_map(|cap| {
            let href = cap.get(1)?.as_str();
            if href == "../" || !href.ends_with('/') {
                return None;
            }
            let name = href.trim_end_matches('/');
            // Absolute or nested targets are not directory entries.
            if name.is_empty() || name.contains('/') || name.contains(':') {
                return None;
            }
            Some(name.to_string())
        })
        .collect()
}

/// Extract version directories from an HTML index page.
///
/// Only names matching a strict `major.minor.patch` triple survive; install
/// scripts and other repository furniture are dropped here.
pub fn parse_index_versions(html: &str) -> Vec<ToolVersion> {
    parse_index_names(html)
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect()
}
