//! GitHub REST implementation of [`RepositoryHost`]
//!
//! Supports both GitHub.com and GitHub Enterprise via configurable base URL.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    BranchListing, FileContent, PullRequestDraft, PullRequestInfo, RepoFile, RepositoryHost,
    fix_branch_name, is_code_file, list_with_branch_fallback,
};
use crate::config::GitHubConfig;
use crate::error::{RepairError, RepairResult};

/// Longest upstream error body kept in an error message
const ERROR_BODY_LIMIT: usize = 300;

/// GitHub API client
pub struct GitHubClient {
    client: Client,
    base_url: String,
    branch_prefix: String,
}

impl GitHubClient {
    /// Create a client from configuration
    pub fn new(config: &GitHubConfig) -> RepairResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("repairbot/0.1"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepairError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            branch_prefix: config.branch_prefix.clone(),
        })
    }

    /// Create with a custom base URL and defaults for everything else
    pub fn with_base_url(base_url: &str) -> RepairResult<Self> {
        let config = GitHubConfig {
            api_base: base_url.to_string(),
            ..GitHubConfig::default()
        };
        Self::new(&config)
    }

    fn url(&self, segments: &[&str]) -> RepairResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RepairError::config(format!("invalid GitHub base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RepairError::config("GitHub base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, credential: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match credential {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures and non-2xx answers to
    /// `RepositoryUnreachable`
    async fn send(&self, builder: RequestBuilder, context: &str) -> RepairResult<Response> {
        let response = builder.send().await.map_err(|e| transport_error(e, context))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(RepairError::unreachable(
            Some(status.as_u16()),
            format!("{} failed: {}", context, excerpt.trim()),
        ))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        context: &str,
    ) -> RepairResult<T> {
        self.send(builder, context)
            .await?
            .json::<T>()
            .await
            .map_err(|e| {
                RepairError::unreachable(None, format!("{}: bad response: {}", context, e))
            })
    }

    /// Every blob in a branch tree, unfiltered
    async fn fetch_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        credential: Option<&str>,
    ) -> RepairResult<Vec<RepoFile>> {
        let mut url = self.url(&["repos", owner, repo, "git", "trees"])?;
        url.path_segments_mut()
            .map_err(|_| RepairError::config("GitHub base URL cannot carry a path"))?
            .push(branch);
        url.query_pairs_mut().append_pair("recursive", "1");

        let tree: GitHubTree = self
            .send_json(self.request(Method::GET, url, credential), "list tree")
            .await?;

        if tree.truncated {
            warn!("Tree for {}/{}@{} was truncated by GitHub", owner, repo, branch);
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.entry_type == "blob")
            .map(|entry| RepoFile {
                path: entry.path,
                size: entry.size,
            })
            .collect())
    }

    async fn default_branch(
        &self,
        owner: &str,
        repo: &str,
        credential: Option<&str>,
    ) -> RepairResult<String> {
        let url = self.url(&["repos", owner, repo])?;
        let info: GitHubRepo =
            self.send_json(self.request(Method::GET, url, credential), "read repository").await?;
        Ok(info.default_branch)
    }

    async fn head_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        credential: Option<&str>,
    ) -> RepairResult<String> {
        let url = self.url(&["repos", owner, repo, "git", "ref", "heads", branch])?;
        let reference: GitHubRef =
            self.send_json(self.request(Method::GET, url, credential), "read branch head").await?;
        Ok(reference.object.sha)
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        credential: &str,
    ) -> RepairResult<()> {
        let url = self.url(&["repos", owner, repo, "git", "refs"])?;
        let body = serde_json::json!({
            "ref": format!("refs/heads/{}", branch),
            "sha": sha,
        });

        self.send(self.request(Method::POST, url, Some(credential)).json(&body), "create branch")
            .await?;
        Ok(())
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> RepairResult<Url> {
        self.url(&["repos", owner, repo, "contents", path.trim_start_matches('/')])
    }

    /// Blob sha of `path` on `branch`, `None` when the file does not exist
    async fn file_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        credential: &str,
    ) -> RepairResult<Option<String>> {
        let mut url = self.contents_url(owner, repo, path)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let request = self.request(Method::GET, url, Some(credential));
        match self.send_json::<GitHubContent>(request, "read file").await {
            Ok(content) => Ok(Some(content.sha)),
            Err(err) if err.is_not_found_upstream() => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        credential: &str,
    ) -> RepairResult<()> {
        let sha = self.file_sha(owner, repo, branch, path, credential).await?;

        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha);
        }

        let url = self.contents_url(owner, repo, path)?;
        self.send(self.request(Method::PUT, url, Some(credential)).json(&body), "write file")
            .await?;
        debug!("Wrote {} on {}", path, branch);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
        credential: &str,
    ) -> RepairResult<GitHubPullRequest> {
        let url = self.url(&["repos", owner, repo, "pulls"])?;
        let request_body = serde_json::json!({
            "title": title,
            "body": body,
            "head": head,
            "base": base,
        });

        self.send_json(
            self.request(Method::POST, url, Some(credential)).json(&request_body),
            "open pull request",
        )
        .await
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_code_files(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        credential: Option<&str>,
    ) -> RepairResult<BranchListing> {
        let mut listing = list_with_branch_fallback(branch, |candidate| async move {
            self.fetch_tree(owner, repo, &candidate, credential).await
        })
        .await?;

        let total = listing.files.len();
        listing.files.retain(|file| is_code_file(&file.path));
        info!(
            "Listed {}/{}@{}: {} code files of {}",
            owner,
            repo,
            listing.branch,
            listing.files.len(),
            total
        );

        Ok(listing)
    }

    async fn fetch_file_content(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        credential: Option<&str>,
    ) -> FileContent {
        let mut url = match self.contents_url(owner, repo, path) {
            Ok(url) => url,
            Err(err) => {
                warn!("Cannot address {}: {}", path, err);
                return FileContent::Unavailable;
            }
        };
        url.query_pairs_mut().append_pair("ref", branch);

        let content: GitHubContent = match self
            .send_json(self.request(Method::GET, url, credential), "read file")
            .await
        {
            Ok(content) => content,
            Err(err) => {
                warn!("File {} unavailable: {}", path, err);
                return FileContent::Unavailable;
            }
        };

        match decode_content(&content) {
            Some(text) => FileContent::Text(text),
            None => {
                warn!("File {} unavailable: undecodable content", path);
                FileContent::Unavailable
            }
        }
    }

    async fn create_commit_and_pull_request(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
        draft: &PullRequestDraft,
    ) -> RepairResult<PullRequestInfo> {
        let base = self.default_branch(owner, repo, Some(credential)).await?;
        let head_sha = self.head_sha(owner, repo, &base, Some(credential)).await?;

        let branch = fix_branch_name(
            &self.branch_prefix,
            &draft.branch_seed,
            &draft.branch_tag,
            Utc::now(),
        );
        self.create_branch(owner, repo, &branch, &head_sha, credential).await?;
        info!("Created branch {} on {}/{} from {}", branch, owner, repo, base);

        // From here on a failure leaves the branch behind
        let written: RepairResult<GitHubPullRequest> = async {
            for file in &draft.files {
                self.put_file(
                    owner,
                    repo,
                    &branch,
                    &file.path,
                    &file.content,
                    &draft.commit_message,
                    credential,
                )
                .await?;
            }
            self.open_pull_request(
                owner,
                repo,
                &draft.title,
                &draft.body,
                &branch,
                &base,
                credential,
            )
            .await
        }
        .await;

        match written {
            Ok(pr) => {
                info!("Opened pull request #{}: {}", pr.number, pr.html_url);
                Ok(PullRequestInfo {
                    number: pr.number,
                    url: pr.html_url,
                    branch,
                    base,
                })
            }
            Err(RepairError::RepositoryUnreachable { status, message }) => {
                Err(RepairError::unreachable(
                    status,
                    format!("{} (branch '{}' was left in place)", message, branch),
                ))
            }
            Err(other) => Err(other),
        }
    }
}

fn transport_error(err: reqwest::Error, context: &str) -> RepairError {
    if err.is_timeout() {
        RepairError::unreachable(None, format!("{} timed out", context))
    } else {
        RepairError::unreachable(err.status().map(|s| s.as_u16()), format!("{}: {}", context, err))
    }
}

fn decode_content(content: &GitHubContent) -> Option<String> {
    match content.encoding.as_deref() {
        Some("base64") | None => {
            let compact: String =
                content.content.as_deref()?.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD.decode(compact).ok()?;
            String::from_utf8(bytes).ok()
        }
        Some(_) => None,
    }
}

#[derive(Debug, Deserialize)]
struct GitHubTree {
    tree: Vec<GitHubTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubTreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRef {
    object: GitHubObject,
}

#[derive(Debug, Deserialize)]
struct GitHubObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubContent {
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    html_url: String,
}
