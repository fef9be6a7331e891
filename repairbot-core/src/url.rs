//! Repository URL parsing

use serde::{Deserialize, Serialize};

use crate::error::{RepairError, RepairResult};

/// Owner and name of a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Extract owner and repository from a `github.com/<owner>/<repo>` URL.
///
/// A trailing `.git` is stripped. Anything else fails with `InvalidUrl`.
pub fn parse_repo_url(url: &str) -> RepairResult<RepoRef> {
    regex_utils::repo_url::extract(url)
        .map(|(owner, name)| RepoRef { owner, name })
        .ok_or_else(|| RepairError::invalid_url(url))
}
