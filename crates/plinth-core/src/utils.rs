//! Shared utility functions for plinth crates

use anyhow::anyhow;
use std::path::PathBuf;

/// Get the user's home directory
///
/// Prefers the HOME environment variable over dirs::home_dir() so that
/// wrappers and containers that relocate HOME are respected.
pub fn get_home_dir() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home));
    }

    dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Convert a declared namespace (`Acme\Blog`) into a dotted identifier (`Acme.Blog`)
pub fn namespace_to_identifier(namespace: &str) -> String {
    namespace
        .trim()
        .trim_matches('\\')
        .split('\\')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}
