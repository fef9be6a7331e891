use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use super::RepairPipeline;
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{Issue, IssueStatus, ScanResult};
use crate::notify::ProgressEvent;
use crate::repo::{FileChange, PullRequestDraft};

/// Tries at saving a `fixed` issue once its pull request exists
const FIX_SAVE_ATTEMPTS: u32 = 3;
const FIX_SAVE_BACKOFF: Duration = Duration::from_millis(50);

impl RepairPipeline {
    /// Open a pull request with the suggested fix for one issue.
    ///
    /// The issue is `fixing` while the host is called and ends `fixed` with
    /// a PR link, or back at `open` with `fix_error` set. Fix usage is only
    /// counted on success.
    pub async fn apply_fix(
        &self,
        user_id: &str,
        scan_id: &str,
        issue_id: &str,
    ) -> RepairResult<Issue> {
        let mut user = self.users.get_user(user_id).await?;
        let credential = user
            .credential()
            .map(str::to_string)
            .ok_or_else(|| RepairError::MissingCredential {
                user_id: user_id.to_string(),
            })?;

        let scan = self.scans.get_scan(user_id, scan_id).await?;
        let mut issue = scan
            .issue(issue_id)
            .cloned()
            .ok_or_else(|| RepairError::not_found("issue", issue_id))?;

        if user.usage.roll_period(Utc::now()) {
            self.users.save_user(&user).await?;
        }
        user.check_quota(QuotaKind::Fixes)?;

        if issue.file.trim().is_empty() || issue.fixed_code.trim().is_empty() {
            return Err(RepairError::analysis(format!(
                "issue '{}' has no suggested fix to apply",
                issue.id
            )));
        }
        if issue.partial_source {
            return Err(RepairError::analysis(format!(
                "'{}' was only partly analyzed; writing the suggested fix would drop the rest \
                 of the file",
                issue.file
            )));
        }

        issue.transition(IssueStatus::Fixing)?;
        issue.fix_error = None;
        // Fails when another request moved the issue since it was read
        self.scans.update_issue(user_id, scan_id, &issue, IssueStatus::Open).await?;
        info!(scan_id, issue_id, file = %issue.file, "Applying fix");
        self.notifier.publish(
            user_id,
            ProgressEvent::FixStarted {
                scan_id: scan_id.to_string(),
                issue_id: issue_id.to_string(),
                timestamp: Utc::now(),
            },
        );

        let draft = pull_request_draft(&scan, &issue);
        let outcome = self
            .host
            .create_commit_and_pull_request(
                &scan.target.owner,
                &scan.target.name,
                &credential,
                &draft,
            )
            .await;

        let pr = match outcome {
            Ok(pr) => pr,
            Err(err) => return Err(self.fail_fix(user_id, scan_id, issue, err).await),
        };

        let mut fixed = issue.clone();
        fixed.transition(IssueStatus::Fixed)?;
        fixed.pr_url = Some(pr.url.clone());
        if let Err(err) = self.save_fixed_issue(user_id, scan_id, &fixed).await {
            let err = RepairError::storage(format!(
                "pull request {} was opened but the issue could not be saved as fixed: {}",
                pr.url, err
            ));
            return Err(self.fail_fix(user_id, scan_id, issue, err).await);
        }

        if let Err(err) = self.users.increment_usage(user_id, QuotaKind::Fixes).await {
            warn!(scan_id, issue_id, "Failed to record fix usage: {}", err);
        }

        info!(scan_id, issue_id, pr = %pr.url, "Fix applied");
        self.notifier.publish(
            user_id,
            ProgressEvent::FixCompleted {
                scan_id: scan_id.to_string(),
                issue_id: issue_id.to_string(),
                pr_url: pr.url,
                timestamp: Utc::now(),
            },
        );
        Ok(fixed)
    }

    /// Persist the `fixed` state, retrying storage errors a few times
    async fn save_fixed_issue(
        &self,
        user_id: &str,
        scan_id: &str,
        issue: &Issue,
    ) -> RepairResult<()> {
        let mut attempt = 1;
        loop {
            match self.scans.update_issue(user_id, scan_id, issue, IssueStatus::Fixing).await {
                Ok(()) => return Ok(()),
                Err(err @ RepairError::Storage { .. }) if attempt < FIX_SAVE_ATTEMPTS => {
                    warn!(
                        scan_id,
                        issue_id = %issue.id,
                        attempt,
                        "Saving fix result failed: {}",
                        err
                    );
                    tokio::time::sleep(FIX_SAVE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Put a `fixing` issue back to `open` with `err` recorded, notify and
    /// return `err`
    async fn fail_fix(
        &self,
        user_id: &str,
        scan_id: &str,
        mut issue: Issue,
        err: RepairError,
    ) -> RepairError {
        warn!(scan_id, issue_id = %issue.id, "Fix failed: {}", err);
        issue.fix_error = Some(err.to_string());
        let reverted = match issue.transition(IssueStatus::Open) {
            Ok(()) => {
                self.scans.update_issue(user_id, scan_id, &issue, IssueStatus::Fixing).await
            }
            Err(transition_err) => Err(transition_err),
        };
        if let Err(save_err) = reverted {
            warn!(scan_id, issue_id = %issue.id, "Failed to persist fix error: {}", save_err);
        }

        self.notifier.publish(
            user_id,
            ProgressEvent::FixFailed {
                scan_id: scan_id.to_string(),
                issue_id: issue.id.clone(),
                error: err.to_string(),
                timestamp: Utc::now(),
            },
        );
        err
    }

    /// Mark an open issue as not worth fixing
    pub async fn dismiss_issue(
        &self,
        user_id: &str,
        scan_id: &str,
        issue_id: &str,
    ) -> RepairResult<Issue> {
        let scan = self.scans.get_scan(user_id, scan_id).await?;
        let mut issue = scan
            .issue(issue_id)
            .cloned()
            .ok_or_else(|| RepairError::not_found("issue", issue_id))?;

        issue.transition(IssueStatus::Dismissed)?;
        self.scans.update_issue(user_id, scan_id, &issue, IssueStatus::Open).await?;
        info!(scan_id, issue_id, "Issue dismissed");
        Ok(issue)
    }

    /// All scans of a user, newest first
    pub async fn scan_history(&self, user_id: &str) -> RepairResult<Vec<ScanResult>> {
        self.scans.list_scans(user_id).await
    }

    /// One scan, only if it belongs to `user_id`
    pub async fn get_scan(&self, user_id: &str, scan_id: &str) -> RepairResult<ScanResult> {
        self.scans.get_scan(user_id, scan_id).await
    }
}

fn pull_request_draft(scan: &ScanResult, issue: &Issue) -> PullRequestDraft {
    let location = match issue.line {
        Some(line) => format!("`{}` line {}", issue.file, line),
        None => format!("`{}`", issue.file),
    };

    let mut body = format!(
        "## {}\n\n**Severity:** {}\n**Type:** {}\n**Location:** {}\n\n### Problem\n{}\n",
        issue.title, issue.severity, issue.issue_type, location, issue.description
    );
    if !issue.impact.is_empty() {
        body.push_str(&format!("\n### Impact\n{}\n", issue.impact));
    }
    if !issue.explanation.is_empty() {
        body.push_str(&format!("\n### Fix\n{}\n", issue.explanation));
    }
    body.push_str(&format!("\n---\nScan `{}` with the {} engine.\n", scan.id, scan.engine));

    PullRequestDraft {
        branch_seed: format!("fix-{}", issue.title),
        branch_tag: issue.id.clone(),
        title: format!("Fix: {}", issue.title),
        body,
        commit_message: format!("fix: {} in {}", issue.title, issue.file),
        files: vec![FileChange {
            path: issue.file.clone(),
            content: issue.fixed_code.clone(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Engine;
    use crate::models::{Plan, ScanTarget, Severity, User};
    use crate::notify::BroadcastNotifier;
    use crate::pipeline::testing::{
        FakeAnalyzer, FakeHost, FlakyStore, draft, pipeline_over, pipeline_with, subscribe,
    };
    use crate::platform::Platform;
    use crate::store::{FileStore, MemoryStore, ScanStore, UserStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    const URL: &str = "https://github.com/acme/widget";

    async fn scanned(
        host: FakeHost,
        user: User,
    ) -> (RepairPipeline, Arc<MemoryStore>, Arc<BroadcastNotifier>, ScanResult) {
        let analyzer =
            FakeAnalyzer::returning(Engine::Groq, vec![draft(Severity::High, "src/app.js")]);
        let (pipeline, store, notifier) = pipeline_with(host, analyzer, user);
        let scan = pipeline.run_scan("alice", URL, Engine::Groq).await.unwrap();
        (pipeline, store, notifier, scan)
    }

    fn host() -> FakeHost {
        FakeHost::with_files(&[("src/app.js", "broken()")])
    }

    #[tokio::test]
    async fn test_fix_success() {
        let host = host();
        let drafts = host.drafts();
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let (pipeline, store, notifier, scan) = scanned(host, user).await;
        let mut events = subscribe(&notifier);
        let issue_id = scan.issues[0].id.clone();

        let issue = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap();

        assert_eq!(issue.status, IssueStatus::Fixed);
        assert_eq!(issue.pr_url.as_deref(), Some("https://github.com/acme/widget/pull/1"));
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        assert_eq!(stored.issue(&issue_id).unwrap().status, IssueStatus::Fixed);
        assert_eq!(store.get_user("alice").await.unwrap().usage.fixes_used, 1);

        let drafts = drafts.lock().unwrap();
        assert_eq!(drafts[0].files, vec![FileChange {
            path: "src/app.js".to_string(),
            content: "fixed()".to_string()
        }]);
        assert!(drafts[0].title.starts_with("Fix: "));
        assert_eq!(drafts[0].branch_tag, issue_id);

        let kinds: Vec<&str> = events.drain().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["fix_started", "fix_completed"]);
    }

    #[tokio::test]
    async fn test_fix_failure_reverts_to_open() {
        let host = host().with_pr_error("Reference already exists");
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let (pipeline, store, notifier, scan) = scanned(host, user).await;
        let mut events = subscribe(&notifier);
        let issue_id = scan.issues[0].id.clone();

        let err = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap_err();

        assert_eq!(err.upstream_status(), Some(422));
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        let issue = stored.issue(&issue_id).unwrap();
        assert_eq!(issue.status, IssueStatus::Open);
        assert!(issue.fix_error.as_deref().unwrap().contains("Reference already exists"));
        assert_eq!(store.get_user("alice").await.unwrap().usage.fixes_used, 0);

        let kinds: Vec<&str> = events.drain().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["fix_started", "fix_failed"]);
    }

    async fn flaky_scan(
        failures: usize,
    ) -> (RepairPipeline, Arc<FlakyStore>, Arc<BroadcastNotifier>, ScanResult) {
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let store = Arc::new(FlakyStore::new(user, failures));
        let analyzer =
            FakeAnalyzer::returning(Engine::Groq, vec![draft(Severity::High, "src/app.js")]);
        let (pipeline, notifier) = pipeline_over(host(), analyzer, store.clone());
        let scan = pipeline.run_scan("alice", URL, Engine::Groq).await.unwrap();
        (pipeline, store, notifier, scan)
    }

    #[tokio::test]
    async fn test_fixed_state_save_is_retried() {
        let (pipeline, store, notifier, scan) = flaky_scan(1).await;
        let mut events = subscribe(&notifier);
        let issue_id = scan.issues[0].id.clone();

        let issue = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap();

        assert_eq!(issue.status, IssueStatus::Fixed);
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        let stored = stored.issue(&issue_id).unwrap();
        assert_eq!(stored.status, IssueStatus::Fixed);
        assert_eq!(stored.pr_url.as_deref(), Some("https://github.com/acme/widget/pull/1"));
        assert_eq!(store.get_user("alice").await.unwrap().usage.fixes_used, 1);

        let kinds: Vec<&str> = events.drain().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["fix_started", "fix_completed"]);
    }

    #[tokio::test]
    async fn test_unsaved_fix_never_stays_fixing() {
        let (pipeline, store, notifier, scan) = flaky_scan(usize::MAX).await;
        let mut events = subscribe(&notifier);
        let issue_id = scan.issues[0].id.clone();

        let err = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap_err();

        match &err {
            RepairError::Storage { message } => {
                assert!(message.contains("https://github.com/acme/widget/pull/1"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        let stored = stored.issue(&issue_id).unwrap();
        assert_eq!(stored.status, IssueStatus::Open);
        assert!(stored.fix_error.as_deref().unwrap().contains("/pull/1"));
        assert_eq!(store.get_user("alice").await.unwrap().usage.fixes_used, 0);

        let kinds: Vec<&str> = events.drain().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["fix_started", "fix_failed"]);
    }

    #[tokio::test]
    async fn test_racing_fixes_open_one_pull_request() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        store
            .save_user(&User::new("alice", Plan::Free).with_token("ghp_secret"))
            .await
            .unwrap();
        let host = host();
        let calls = host.calls();
        let analyzer =
            FakeAnalyzer::returning(Engine::Groq, vec![draft(Severity::High, "src/app.js")]);
        let (pipeline, _) = pipeline_over(host, analyzer, store.clone());
        let scan = pipeline.run_scan("alice", URL, Engine::Groq).await.unwrap();
        let issue_id = scan.issues[0].id.clone();

        let (a, b) = tokio::join!(
            pipeline.apply_fix("alice", &scan.id, &issue_id),
            pipeline.apply_fix("alice", &scan.id, &issue_id)
        );

        let (won, lost) = match (a, b) {
            (Ok(issue), Err(err)) | (Err(err), Ok(issue)) => (issue, err),
            (a, b) => panic!("expected exactly one fix to win: {:?} / {:?}", a, b),
        };
        assert_eq!(won.status, IssueStatus::Fixed);
        assert!(matches!(lost, RepairError::InvalidTransition { .. }));
        assert_eq!(calls.pull_requests(), 1);
        assert_eq!(store.get_user("alice").await.unwrap().usage.fixes_used, 1);
    }

    #[tokio::test]
    async fn test_partly_analyzed_file_is_not_overwritten() {
        let big = "let x = 1;\n".repeat(8);
        let host = FakeHost::with_files(&[("src/app.js", big.as_str())]);
        let calls = host.calls();
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let analyzer =
            FakeAnalyzer::returning(Engine::Groq, vec![draft(Severity::High, "src/app.js")]);
        let (pipeline, store, _) = pipeline_with(host, analyzer, user);
        let mut settings = pipeline.settings().clone();
        settings.max_file_bytes = 32;
        let pipeline = pipeline.with_settings(settings);
        let scan = pipeline.run_scan("alice", URL, Engine::Groq).await.unwrap();
        let issue_id = scan.issues[0].id.clone();
        assert!(scan.issues[0].partial_source);

        let err = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap_err();

        match err {
            RepairError::AnalysisFailed { message } => assert!(message.contains("partly analyzed")),
            other => panic!("unexpected error: {:?}", other),
        }
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        assert_eq!(stored.issue(&issue_id).unwrap().status, IssueStatus::Open);
        assert_eq!(calls.pull_requests(), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_leaves_issue_open() {
        let host = host();
        let calls = host.calls();
        let (pipeline, store, _, scan) = scanned(host, User::new("alice", Plan::Pro)).await;
        let issue_id = scan.issues[0].id.clone();

        let err = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap_err();

        assert!(matches!(err, RepairError::MissingCredential { .. }));
        let stored = store.get_scan("alice", &scan.id).await.unwrap();
        assert_eq!(stored.issue(&issue_id).unwrap().status, IssueStatus::Open);
        assert_eq!(calls.pull_requests(), 0);
    }

    #[tokio::test]
    async fn test_fix_quota_exhausted() {
        let mut user = User::new("alice", Plan::Free).with_token("ghp_secret");
        user.usage.fixes_used = Plan::Free.fix_limit().unwrap();
        let (pipeline, _, _, scan) = scanned(host(), user).await;

        let err = pipeline.apply_fix("alice", &scan.id, &scan.issues[0].id).await.unwrap_err();
        assert!(matches!(err, RepairError::QuotaExceeded { kind: QuotaKind::Fixes, .. }));
    }

    #[tokio::test]
    async fn test_unknown_scan_or_issue() {
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let (pipeline, _, _, scan) = scanned(host(), user).await;

        let err = pipeline.apply_fix("alice", "no-such-scan", "x").await.unwrap_err();
        assert!(matches!(err, RepairError::NotFound { entity: "scan", .. }));

        let err = pipeline.apply_fix("alice", &scan.id, "no-such-issue").await.unwrap_err();
        assert!(matches!(err, RepairError::NotFound { entity: "issue", .. }));
    }

    #[tokio::test]
    async fn test_fixed_issue_cannot_be_fixed_again() {
        let user = User::new("alice", Plan::Free).with_token("ghp_secret");
        let (pipeline, _, _, scan) = scanned(host(), user).await;
        let issue_id = scan.issues[0].id.clone();

        pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap();
        let err = pipeline.apply_fix("alice", &scan.id, &issue_id).await.unwrap_err();
        assert!(matches!(err, RepairError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_dismiss() {
        let (pipeline, _, _, scan) = scanned(host(), User::new("alice", Plan::Free)).await;
        let issue_id = scan.issues[0].id.clone();

        let issue = pipeline.dismiss_issue("alice", &scan.id, &issue_id).await.unwrap();
        assert_eq!(issue.status, IssueStatus::Dismissed);

        let err = pipeline.dismiss_issue("alice", &scan.id, &issue_id).await.unwrap_err();
        assert!(matches!(err, RepairError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pull_request_body() {
        let target = ScanTarget {
            url: URL.to_string(),
            owner: "acme".to_string(),
            name: "widget".to_string(),
            branch: "main".to_string(),
            platform: Platform::Web,
        };
        let scan = ScanResult::new("alice", target, Engine::Groq);
        let issue = Issue::from_draft(draft(Severity::Critical, "src/app.js"));

        let pr = pull_request_draft(&scan, &issue);
        assert!(pr.body.contains("**Severity:** critical"));
        assert!(pr.body.contains("`src/app.js` line 1"));
        assert!(pr.body.contains("### Impact\nCrashes on start"));
        assert_eq!(pr.commit_message, format!("fix: {} in src/app.js", issue.title));
    }
}
