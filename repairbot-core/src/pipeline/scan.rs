use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RepairPipeline;
use crate::analyzer::{AnalysisRequest, Engine, IssueAnalyzer, SourceFile};
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{DraftIssue, Issue, ScanResult, ScanTarget, User};
use crate::notify::ProgressEvent;
use crate::platform::{Platform, detect_platform};
use crate::repo::{DEFAULT_BRANCH_GUESS, FileContent};
use crate::url::parse_repo_url;

impl RepairPipeline {
    /// Scan a repository for `user_id` with `engine`.
    ///
    /// Quota, engine and URL checks happen before any network call and leave
    /// no record behind. Once the scan record exists, every failure is
    /// stored on it as `error` and returned.
    pub async fn run_scan(
        &self,
        user_id: &str,
        url: &str,
        engine: Engine,
    ) -> RepairResult<ScanResult> {
        let user = self.load_user_with_quota(user_id, QuotaKind::Scans).await?;
        if !engine.is_permitted_for(user.plan) {
            return Err(RepairError::EngineNotPermitted {
                engine,
                plan: user.plan,
            });
        }
        let analyzer = self.analyzers.get(engine)?;
        let repo = parse_repo_url(url)?;

        let target = ScanTarget {
            url: url.trim().to_string(),
            owner: repo.owner,
            name: repo.name,
            branch: DEFAULT_BRANCH_GUESS.to_string(),
            platform: Platform::Other,
        };
        let mut scan = ScanResult::new(user_id, target, engine);
        scan.mark_scanning();
        self.scans.create_scan(&scan).await?;

        info!(
            scan_id = %scan.id,
            owner = %scan.target.owner,
            repo = %scan.target.name,
            engine = %engine,
            "Scan started"
        );
        self.notifier.publish(
            user_id,
            ProgressEvent::Scanning {
                scan_id: scan.id.clone(),
                repository: format!("{}/{}", scan.target.owner, scan.target.name),
                timestamp: Utc::now(),
            },
        );

        if let Err(err) = self.scan_repository(&user, &mut scan, analyzer.as_ref()).await {
            return Err(self.fail_scan(&mut scan, err).await);
        }
        if let Err(err) = self.scans.save_scan(&scan).await {
            return Err(self.fail_scan(&mut scan, err).await);
        }

        if let Err(err) = self.users.increment_usage(user_id, QuotaKind::Scans).await {
            warn!(scan_id = %scan.id, "Failed to record scan usage: {}", err);
        }

        info!(
            scan_id = %scan.id,
            issues = scan.stats.total_issues(),
            files = scan.stats.total_files,
            "Scan completed"
        );
        self.notifier.publish(
            user_id,
            ProgressEvent::ScanCompleted {
                result: Box::new(scan.clone()),
                timestamp: Utc::now(),
            },
        );

        Ok(scan)
    }

    /// List, fetch, detect and analyze; fills `scan` on success
    async fn scan_repository(
        &self,
        user: &User,
        scan: &mut ScanResult,
        analyzer: &dyn IssueAnalyzer,
    ) -> RepairResult<()> {
        let credential = user.credential();
        let owner = scan.target.owner.clone();
        let name = scan.target.name.clone();

        let listing =
            self.host.list_code_files(&owner, &name, &scan.target.branch, credential).await?;
        scan.target.branch = listing.branch.clone();
        scan.target.platform = detect_platform(
            &listing.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
        );
        debug!(
            scan_id = %scan.id,
            branch = %listing.branch,
            listed = listing.files.len(),
            platform = %scan.target.platform,
            "Listed code files"
        );

        let mut files = Vec::new();
        for file in listing.files.iter().take(self.settings.max_files) {
            match self
                .host
                .fetch_file_content(&owner, &name, &listing.branch, &file.path, credential)
                .await
            {
                FileContent::Text(content) => files.push(SourceFile::new(&file.path, content)),
                FileContent::Unavailable => {
                    debug!(scan_id = %scan.id, path = %file.path, "Skipping unavailable file")
                }
            }
        }

        self.notifier.publish(
            &user.id,
            ProgressEvent::Analyzing {
                scan_id: scan.id.clone(),
                file_count: files.len(),
                timestamp: Utc::now(),
            },
        );

        let total_files = files.len();
        let total_lines: usize = files.iter().map(SourceFile::line_count).sum();
        let partial: HashSet<String> = files
            .iter()
            .filter(|f| f.content.len() > self.settings.max_file_bytes)
            .map(|f| f.path.clone())
            .collect();

        let drafts = if files.is_empty() {
            info!(scan_id = %scan.id, "No retrievable files, completing with zero issues");
            Vec::new()
        } else {
            let request = AnalysisRequest {
                files,
                platform: scan.target.platform,
            };
            self.analyze_with_timeout(analyzer, &request).await?
        };

        let issues = drafts
            .into_iter()
            .map(|draft| {
                let mut issue = Issue::from_draft(draft);
                issue.partial_source = partial.contains(&issue.file);
                issue
            })
            .collect();
        scan.complete(issues, count(total_files), count(total_lines));
        Ok(())
    }

    async fn analyze_with_timeout(
        &self,
        analyzer: &dyn IssueAnalyzer,
        request: &AnalysisRequest,
    ) -> RepairResult<Vec<DraftIssue>> {
        let limit = Duration::from_secs(self.settings.analysis_timeout_secs);
        tokio::time::timeout(limit, analyzer.analyze(request)).await.map_err(|_| {
            RepairError::analysis(format!(
                "{} analysis timed out after {}s",
                analyzer.engine(),
                limit.as_secs()
            ))
        })?
    }

    /// Record `err` on the scan, persist it and notify; returns `err`
    async fn fail_scan(&self, scan: &mut ScanResult, err: RepairError) -> RepairError {
        warn!(scan_id = %scan.id, "Scan failed: {}", err);
        scan.fail(err.to_string());
        if let Err(save_err) = self.scans.save_scan(scan).await {
            warn!(scan_id = %scan.id, "Failed to persist scan error: {}", save_err);
        }
        self.notifier.publish(
            &scan.user_id,
            ProgressEvent::ScanFailed {
                scan_id: scan.id.clone(),
                error: err.to_string(),
                timestamp: Utc::now(),
            },
        );
        err
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
