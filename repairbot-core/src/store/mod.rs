//! Persistence for scans and users
//!
//! Every scan read is scoped to its owner: asking for another user's scan is
//! indistinguishable from asking for one that does not exist.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::models::{Issue, IssueStatus, ScanResult, Usage, User};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert a new scan; fails if the id is taken
    async fn create_scan(&self, scan: &ScanResult) -> RepairResult<()>;

    /// Insert or replace a whole scan
    async fn save_scan(&self, scan: &ScanResult) -> RepairResult<()>;

    /// `NotFound` when absent or owned by someone else
    async fn get_scan(&self, user_id: &str, scan_id: &str) -> RepairResult<ScanResult>;

    /// All scans of a user, newest first
    async fn list_scans(&self, user_id: &str) -> RepairResult<Vec<ScanResult>>;

    /// Replace one issue inside a stored scan, leaving the rest untouched.
    ///
    /// The write only lands while the stored issue is still in `expected`
    /// and `expected` may move to `issue.status`. Otherwise the call fails
    /// with `InvalidTransition` and nothing changes, so two requests racing
    /// on one issue cannot both win.
    async fn update_issue(
        &self,
        user_id: &str,
        scan_id: &str,
        issue: &Issue,
        expected: IssueStatus,
    ) -> RepairResult<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `NotFound` when absent
    async fn get_user(&self, user_id: &str) -> RepairResult<User>;

    async fn save_user(&self, user: &User) -> RepairResult<()>;

    /// Add one to a usage counter as a single step, rolling the period first
    /// if it has elapsed. Returns the counters after the update.
    async fn increment_usage(&self, user_id: &str, kind: QuotaKind) -> RepairResult<Usage>;
}

/// Store that keeps both kinds of record
pub trait Store: ScanStore + UserStore {}

impl<T: ScanStore + UserStore> Store for T {}

fn bump(usage: &mut Usage, kind: QuotaKind) {
    usage.roll_period(Utc::now());
    match kind {
        QuotaKind::Scans => usage.scans_used += 1,
        QuotaKind::Fixes => usage.fixes_used += 1,
    }
}

fn replace_issue(scan: &mut ScanResult, issue: &Issue, expected: IssueStatus) -> RepairResult<()> {
    let slot = scan
        .issue_mut(&issue.id)
        .ok_or_else(|| RepairError::not_found("issue", &issue.id))?;
    if slot.status != expected || !expected.can_transition_to(issue.status) {
        return Err(RepairError::InvalidTransition {
            issue_id: issue.id.clone(),
            from: slot.status.to_string(),
            to: issue.status.to_string(),
        });
    }
    *slot = issue.clone();
    scan.updated_at = Utc::now();
    Ok(())
}

fn newest_first(scans: &mut [ScanResult]) {
    scans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
