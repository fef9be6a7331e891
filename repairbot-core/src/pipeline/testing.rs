//! Fakes shared by the pipeline tests

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use super::RepairPipeline;
use crate::analyzer::{AnalysisRequest, AnalyzerSet, Engine, IssueAnalyzer};
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{
    DraftIssue, Issue, IssueStatus, IssueType, ScanResult, Severity, Usage, User,
};
use crate::notify::{BroadcastNotifier, ProgressEvent, UserEvent};
use crate::repo::{
    BranchListing, FileContent, PullRequestDraft, PullRequestInfo, RepoFile, RepositoryHost,
};
use crate::store::{MemoryStore, ScanStore, Store, UserStore};

#[derive(Debug, Default)]
pub struct CallLog {
    lists: AtomicUsize,
    fetches: AtomicUsize,
    pull_requests: AtomicUsize,
}

impl CallLog {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn pull_requests(&self) -> usize {
        self.pull_requests.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.lists.load(Ordering::SeqCst) + self.fetches() + self.pull_requests()
    }
}

/// In-memory repository host
pub struct FakeHost {
    files: Vec<(String, String)>,
    unavailable: HashSet<String>,
    list_error: Option<(u16, String)>,
    pr_error: Option<String>,
    drafts: Arc<std::sync::Mutex<Vec<PullRequestDraft>>>,
    calls: Arc<CallLog>,
}

impl FakeHost {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
            unavailable: HashSet::new(),
            list_error: None,
            pr_error: None,
            drafts: Arc::default(),
            calls: Arc::default(),
        }
    }

    pub fn unreachable(status: u16, message: &str) -> Self {
        let mut host = Self::with_files(&[]);
        host.list_error = Some((status, message.to_string()));
        host
    }

    pub fn with_unavailable(mut self, paths: &[&str]) -> Self {
        self.unavailable.extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_pr_error(mut self, message: &str) -> Self {
        self.pr_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Arc<CallLog> {
        self.calls.clone()
    }

    pub fn drafts(&self) -> Arc<std::sync::Mutex<Vec<PullRequestDraft>>> {
        self.drafts.clone()
    }
}

#[async_trait]
impl RepositoryHost for FakeHost {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_code_files(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
        _credential: Option<&str>,
    ) -> RepairResult<BranchListing> {
        self.calls.lists.fetch_add(1, Ordering::SeqCst);
        if let Some((status, message)) = &self.list_error {
            return Err(RepairError::unreachable(Some(*status), message.clone()));
        }
        Ok(BranchListing {
            branch: branch.to_string(),
            files: self.files.iter().map(|(path, _)| RepoFile::new(path.clone())).collect(),
        })
    }

    async fn fetch_file_content(
        &self,
        _owner: &str,
        _repo: &str,
        _branch: &str,
        path: &str,
        _credential: Option<&str>,
    ) -> FileContent {
        self.calls.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(path) {
            return FileContent::Unavailable;
        }
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, content)| FileContent::Text(content.clone()))
            .unwrap_or(FileContent::Unavailable)
    }

    async fn create_commit_and_pull_request(
        &self,
        owner: &str,
        repo: &str,
        _credential: &str,
        draft: &PullRequestDraft,
    ) -> RepairResult<PullRequestInfo> {
        let number = self.calls.pull_requests.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.drafts.lock().unwrap().push(draft.clone());
        if let Some(message) = &self.pr_error {
            return Err(RepairError::unreachable(Some(422), message.clone()));
        }
        Ok(PullRequestInfo {
            number,
            url: format!("https://github.com/{}/{}/pull/{}", owner, repo, number),
            branch: format!("repairbot/{}", draft.branch_seed),
            base: "main".to_string(),
        })
    }
}

enum Behavior {
    Return(Vec<DraftIssue>),
    Fail(String),
    Stall,
}

pub struct FakeAnalyzer {
    engine: Engine,
    behavior: Behavior,
}

impl FakeAnalyzer {
    pub fn returning(engine: Engine, drafts: Vec<DraftIssue>) -> Self {
        Self {
            engine,
            behavior: Behavior::Return(drafts),
        }
    }

    pub fn failing(engine: Engine, message: &str) -> Self {
        Self {
            engine,
            behavior: Behavior::Fail(message.to_string()),
        }
    }

    pub fn stalling(engine: Engine) -> Self {
        Self {
            engine,
            behavior: Behavior::Stall,
        }
    }
}

#[async_trait]
impl IssueAnalyzer for FakeAnalyzer {
    fn engine(&self) -> Engine {
        self.engine
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> RepairResult<Vec<DraftIssue>> {
        match &self.behavior {
            Behavior::Return(drafts) => Ok(drafts.clone()),
            Behavior::Fail(message) => Err(RepairError::analysis(message.clone())),
            Behavior::Stall => std::future::pending().await,
        }
    }
}

pub fn draft(severity: Severity, file: &str) -> DraftIssue {
    DraftIssue {
        issue_type: IssueType::Crash,
        severity,
        title: format!("{:?} problem in {}", severity, file),
        description: "Something is wrong".to_string(),
        file: file.to_string(),
        line: Some(1),
        original_code: "broken()".to_string(),
        fixed_code: "fixed()".to_string(),
        explanation: "Calls the fixed variant".to_string(),
        impact: "Crashes on start".to_string(),
    }
}

pub fn pipeline_with(
    host: FakeHost,
    analyzer: FakeAnalyzer,
    user: User,
) -> (RepairPipeline, Arc<MemoryStore>, Arc<BroadcastNotifier>) {
    let store = Arc::new(MemoryStore::with_users([user]));
    let (pipeline, notifier) = pipeline_over(host, analyzer, store.clone());
    (pipeline, store, notifier)
}

/// Pipeline over any store; users must already be in it
pub fn pipeline_over<S: Store + 'static>(
    host: FakeHost,
    analyzer: FakeAnalyzer,
    store: Arc<S>,
) -> (RepairPipeline, Arc<BroadcastNotifier>) {
    let notifier = Arc::new(BroadcastNotifier::new());
    let analyzers = AnalyzerSet::new().with(Arc::new(analyzer));
    let pipeline =
        RepairPipeline::new(Arc::new(host), analyzers, store).with_notifier(notifier.clone());
    (pipeline, notifier)
}

/// Memory store that refuses the first `n` writes of a `fixed` issue
pub struct FlakyStore {
    inner: MemoryStore,
    fixed_write_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(user: User, fixed_write_failures: usize) -> Self {
        Self {
            inner: MemoryStore::with_users([user]),
            fixed_write_failures: AtomicUsize::new(fixed_write_failures),
        }
    }
}

#[async_trait]
impl ScanStore for FlakyStore {
    async fn create_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        self.inner.create_scan(scan).await
    }

    async fn save_scan(&self, scan: &ScanResult) -> RepairResult<()> {
        self.inner.save_scan(scan).await
    }

    async fn get_scan(&self, user_id: &str, scan_id: &str) -> RepairResult<ScanResult> {
        self.inner.get_scan(user_id, scan_id).await
    }

    async fn list_scans(&self, user_id: &str) -> RepairResult<Vec<ScanResult>> {
        self.inner.list_scans(user_id).await
    }

    async fn update_issue(
        &self,
        user_id: &str,
        scan_id: &str,
        issue: &Issue,
        expected: IssueStatus,
    ) -> RepairResult<()> {
        let refuse = issue.status == IssueStatus::Fixed
            && self
                .fixed_write_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refuse {
            return Err(RepairError::storage("disk full"));
        }
        self.inner.update_issue(user_id, scan_id, issue, expected).await
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    async fn get_user(&self, user_id: &str) -> RepairResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn save_user(&self, user: &User) -> RepairResult<()> {
        self.inner.save_user(user).await
    }

    async fn increment_usage(&self, user_id: &str, kind: QuotaKind) -> RepairResult<Usage> {
        self.inner.increment_usage(user_id, kind).await
    }
}

pub struct Recorded {
    pub kind: &'static str,
    pub event: ProgressEvent,
}

pub struct EventLog {
    receiver: broadcast::Receiver<UserEvent>,
}

impl EventLog {
    /// Everything published so far
    pub fn drain(&mut self) -> Vec<Recorded> {
        let mut events = Vec::new();
        while let Ok(UserEvent { event, .. }) = self.receiver.try_recv() {
            let kind = match &event {
                ProgressEvent::Scanning { .. } => "scanning",
                ProgressEvent::Analyzing { .. } => "analyzing",
                ProgressEvent::ScanCompleted { .. } => "scan_completed",
                ProgressEvent::ScanFailed { .. } => "scan_failed",
                ProgressEvent::FixStarted { .. } => "fix_started",
                ProgressEvent::FixCompleted { .. } => "fix_completed",
                ProgressEvent::FixFailed { .. } => "fix_failed",
            };
            events.push(Recorded { kind, event });
        }
        events
    }
}

pub fn subscribe(notifier: &BroadcastNotifier) -> EventLog {
    EventLog {
        receiver: notifier.subscribe(),
    }
}
