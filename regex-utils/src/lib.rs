//! Regex utilities for repairbot
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Compiled patterns for repository URL extraction
pub mod repo_url {
    use super::*;

    pub static GITHUB_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(concat!(
            r"^(?:https?://)?(?:www\.)?github\.com/",
            r"([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+?)(?:\.git)?/?(?:[/?#].*)?$",
        ))
        .expect("Invalid regex pattern")
    });

    /// Extract `(owner, repo)` from a GitHub repository URL
    pub fn extract(text: &str) -> Option<(String, String)> {
        let caps = GITHUB_PATTERN.captures(text.trim())?;
        let owner = caps.get(1)?.as_str();
        let repo = caps.get(2)?.as_str();

        // "." and ".." would pass the character class but are never repositories
        if owner.chars().all(|c| c == '.') || repo.chars().all(|c| c == '.') {
            return None;
        }

        Some((owner.to_string(), repo.to_string()))
    }
}

/// Patterns for pulling structured payloads out of model responses
pub mod json_block {
    use super::*;

    pub static FENCED_PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*\n(.*?)```").expect("Invalid regex pattern")
    });

    /// Return the body of the first fenced code block, if any
    pub fn extract_fenced(text: &str) -> Option<&str> {
        FENCED_PATTERN
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }
}

/// Branch name helpers
pub mod branch_name {
    use super::*;

    /// Longest segment [`sanitize`] returns
    pub const MAX_SEGMENT_LEN: usize = 40;

    static INVALID_CHARS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("Invalid regex pattern"));

    // git refuses ".." anywhere in a ref
    static DOT_RUNS: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\.{2,}").expect("Invalid regex pattern"));

    fn trim_edges(text: &str) -> &str {
        text.trim_matches(|c| c == '-' || c == '.')
    }

    /// Turn an arbitrary seed into a single valid git ref segment of at
    /// most [`MAX_SEGMENT_LEN`] characters
    pub fn sanitize(seed: &str) -> String {
        let replaced = INVALID_CHARS.replace_all(seed.trim(), "-");
        let replaced = DOT_RUNS.replace_all(&replaced, ".");
        let lowered = trim_edges(&replaced).to_lowercase();

        // Only ASCII remains, so byte slicing is safe
        let capped = trim_edges(&lowered[..lowered.len().min(MAX_SEGMENT_LEN)]);
        if capped.is_empty() { "fix".to_string() } else { capped.to_string() }
    }
}
