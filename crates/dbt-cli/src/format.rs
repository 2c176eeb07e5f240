// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plain-text rendering for catalog and purge output.

use dbt_core::ToolVersion;
use dbt_purge::PurgePlan;
use dbt_repo::CatalogEntry;
use std::fmt::Write as _;

/// Render the catalog as an aligned name/description table.
pub fn catalog_table(entries: &[CatalogEntry], with_versions: bool) -> String {
    if entries.is_empty() {
        return "no tools published\n".to_string();
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let description = entry.description.as_deref().unwrap_or("");
        let _ = writeln!(out, "{:width$}  {description}", entry.name);
        if with_versions {
            for version in &entry.versions {
                let _ = writeln!(out, "{:width$}    {version}", "");
            }
        }
    }
    out
}

/// Render one tool in detail.
pub fn describe_block(
    tool: &str,
    latest: &ToolVersion,
    description: Option<&str>,
    versions: &[ToolVersion],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{tool}");
    let _ = writeln!(out, "  latest: {latest}");
    if let Some(description) = description {
        let _ = writeln!(out, "  {description}");
    }
    let rendered: Vec<String> = versions.iter().map(ToolVersion::to_string).collect();
    let _ = writeln!(out, "  versions: {}", rendered.join(", "));
    out
}

/// Render a purge plan summary, with the full-purge warning when it applies.
pub fn purge_summary(plan: &PurgePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "purging {} of {} version(s) of '{}':",
        plan.deletions.len(),
        plan.all_versions.len(),
        plan.tool
    );
    for info in &plan.deletions {
        let _ = writeln!(out, "  {}  (modified {})", info.version, info.modified_at);
    }
    if plan.is_full_purge() {
        let _ = writeln!(
            out,
            "warning: this removes EVERY published version of '{}'",
            plan.tool
        );
    }
    out
}
