//! Repository host integration
//!
//! Lists and downloads code files for a scan and writes fixes back as pull
//! requests. The GitHub REST implementation lives in [`github`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

use crate::error::RepairResult;

pub mod github;

pub use github::GitHubClient;

/// Branch tried first when the caller does not know the default branch
pub const DEFAULT_BRANCH_GUESS: &str = "main";

/// The single fallback for [`DEFAULT_BRANCH_GUESS`]
pub const FALLBACK_BRANCH: &str = "master";

/// Extensions treated as source code (general-purpose languages plus
/// markup and configuration formats)
pub const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "py", "java", "kt", "kts", "swift", "dart", "go",
    "rs", "rb", "php", "c", "h", "cc", "cpp", "hpp", "cs", "m", "mm", "scala", "vue", "svelte",
    "html", "css", "scss", "json", "yaml", "yml", "xml", "gradle", "sh", "sql",
];

/// True when the path has an extension from [`CODE_EXTENSIONS`]
pub fn is_code_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            CODE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// A file entry from a branch tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    pub path: String,
    pub size: Option<u64>,
}

impl RepoFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }
}

/// Result of listing a branch, naming the branch that was actually read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchListing {
    pub branch: String,
    pub files: Vec<RepoFile>,
}

/// Downloaded file content. Fetch failures are never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Unavailable,
}

impl FileContent {
    pub fn into_text(self) -> Option<String> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Unavailable => None,
        }
    }
}

/// One file written by a fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Everything needed to open a pull request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    /// Human readable seed; sanitized and shortened
    pub branch_seed: String,
    /// Short unique tag (an issue id) that keeps branches for
    /// same-titled fixes apart
    pub branch_tag: String,
    pub title: String,
    pub body: String,
    pub commit_message: String,
    pub files: Vec<FileChange>,
}

/// Pull request information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub branch: String,
    pub base: String,
}

/// Operations the pipeline needs from a repository host
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Get the name of this host
    fn name(&self) -> &str;

    /// List the code files of a branch, falling back from `main` to `master`
    /// once when `main` does not exist
    async fn list_code_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        credential: Option<&str>,
    ) -> RepairResult<BranchListing>;

    /// Download one file; any failure yields [`FileContent::Unavailable`]
    async fn fetch_file_content(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        credential: Option<&str>,
    ) -> FileContent;

    /// Branch from the default branch, commit `draft.files` and open a pull
    /// request.
    ///
    /// Not atomic: when a step after branch creation fails, the branch and
    /// any files already written stay on the host. The returned error names
    /// the branch.
    async fn create_commit_and_pull_request(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
        draft: &PullRequestDraft,
    ) -> RepairResult<PullRequestInfo>;
}

/// Run `list` for `branch`, retrying exactly once with `master` when the
/// branch was the `main` guess and the host answered 404.
pub async fn list_with_branch_fallback<F, Fut>(
    branch: &str,
    mut list: F,
) -> RepairResult<BranchListing>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = RepairResult<Vec<RepoFile>>>,
{
    match list(branch.to_string()).await {
        Ok(files) => Ok(BranchListing {
            branch: branch.to_string(),
            files,
        }),
        Err(err) if branch == DEFAULT_BRANCH_GUESS && err.is_not_found_upstream() => {
            warn!("Branch '{}' not found, retrying with '{}'", branch, FALLBACK_BRANCH);
            let files = list(FALLBACK_BRANCH.to_string()).await?;
            Ok(BranchListing {
                branch: FALLBACK_BRANCH.to_string(),
                files,
            })
        }
        Err(err) => Err(err),
    }
}

/// Characters of the tag kept in a branch name
const BRANCH_TAG_LEN: usize = 8;

/// Name of the branch a fix is committed to:
/// `<prefix>/<seed>-<tag>-<unix seconds>`
pub fn fix_branch_name(prefix: &str, seed: &str, tag: &str, now: DateTime<Utc>) -> String {
    let tag: String =
        tag.chars().filter(char::is_ascii_alphanumeric).take(BRANCH_TAG_LEN).collect();
    let seed = regex_utils::branch_name::sanitize(seed);
    if tag.is_empty() {
        format!("{}/{}-{}", prefix, seed, now.timestamp())
    } else {
        format!("{}/{}-{}-{}", prefix, seed, tag.to_lowercase(), now.timestamp())
    }
}
