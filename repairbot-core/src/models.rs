//! Domain records for scans, issues and users

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::analyzer::Engine;
use crate::error::{QuotaKind, RepairError, RepairResult};
use crate::platform::Platform;

/// Length of one quota period
pub const USAGE_PERIOD_DAYS: i64 = 30;

/// Subscription plan; ordering follows privilege
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    /// Scans allowed per period, `None` when unlimited
    pub fn scan_limit(&self) -> Option<u32> {
        match self {
            Plan::Free => Some(5),
            Plan::Starter => Some(50),
            Plan::Pro => Some(500),
            Plan::Enterprise => None,
        }
    }

    /// Fixes allowed per period, `None` when unlimited
    pub fn fix_limit(&self) -> Option<u32> {
        match self {
            Plan::Free => Some(3),
            Plan::Starter => Some(25),
            Plan::Pro => Some(250),
            Plan::Enterprise => None,
        }
    }

    pub fn limit(&self, kind: QuotaKind) -> Option<u32> {
        match kind {
            QuotaKind::Scans => self.scan_limit(),
            QuotaKind::Fixes => self.fix_limit(),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Plan {
    type Err = RepairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(RepairError::config(format!("unknown plan '{}'", other))),
        }
    }
}

/// Per-period usage counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub scans_used: u32,
    pub fixes_used: u32,
    pub period_start: DateTime<Utc>,
}

impl Usage {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            scans_used: 0,
            fixes_used: 0,
            period_start: now,
        }
    }

    pub fn used(&self, kind: QuotaKind) -> u32 {
        match kind {
            QuotaKind::Scans => self.scans_used,
            QuotaKind::Fixes => self.fixes_used,
        }
    }

    /// Reset the counters when the period has elapsed. Returns true on reset.
    pub fn roll_period(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.period_start >= Duration::days(USAGE_PERIOD_DAYS) {
            *self = Usage::new(now);
            true
        } else {
            false
        }
    }
}

/// A user as seen by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub plan: Plan,
    /// Repository host token used for private repositories and fixes
    pub github_token: Option<String>,
    pub usage: Usage,
}

impl User {
    pub fn new(id: impl Into<String>, plan: Plan) -> Self {
        Self {
            id: id.into(),
            plan,
            github_token: None,
            usage: Usage::new(Utc::now()),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    /// Fail with `QuotaExceeded` when the counter for `kind` is exhausted
    pub fn check_quota(&self, kind: QuotaKind) -> RepairResult<()> {
        match self.plan.limit(kind) {
            Some(limit) if self.usage.used(kind) >= limit => {
                Err(RepairError::QuotaExceeded { kind, limit })
            }
            _ => Ok(()),
        }
    }

    /// Stored token, ignoring blank values
    pub fn credential(&self) -> Option<&str> {
        self.github_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Repository a scan runs against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub url: String,
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub platform: Platform,
}

/// Kind of problem reported by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Crash,
    MemoryLeak,
    Anr,
    Warning,
    Error,
    Security,
    Performance,
}

impl IssueType {
    /// Lenient parse used for model output; unknown values become `Warning`
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "crash" => IssueType::Crash,
            "memory_leak" | "leak" => IssueType::MemoryLeak,
            "anr" => IssueType::Anr,
            "error" | "bug" => IssueType::Error,
            "security" | "vulnerability" => IssueType::Security,
            "performance" | "perf" => IssueType::Performance,
            _ => IssueType::Warning,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueType::Crash => "crash",
            IssueType::MemoryLeak => "memory_leak",
            IssueType::Anr => "anr",
            IssueType::Warning => "warning",
            IssueType::Error => "error",
            IssueType::Security => "security",
            IssueType::Performance => "performance",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Lenient parse used for model output; unknown values become `Medium`
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "high" | "major" | "error" => Severity::High,
            "low" | "minor" | "info" | "note" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// Issue lifecycle: open -> fixing -> {fixed, open}, or open -> dismissed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Fixing,
    Fixed,
    Dismissed,
}

impl IssueStatus {
    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        matches!(
            (self, next),
            (IssueStatus::Open, IssueStatus::Fixing)
                | (IssueStatus::Open, IssueStatus::Dismissed)
                | (IssueStatus::Fixing, IssueStatus::Fixed)
                | (IssueStatus::Fixing, IssueStatus::Open)
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueStatus::Open => "open",
            IssueStatus::Fixing => "fixing",
            IssueStatus::Fixed => "fixed",
            IssueStatus::Dismissed => "dismissed",
        };
        write!(f, "{}", name)
    }
}

/// Issue as returned by an engine, before it joins a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub file: String,
    pub line: Option<u32>,
    pub original_code: String,
    pub fixed_code: String,
    pub explanation: String,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub file: String,
    pub line: Option<u32>,
    pub original_code: String,
    pub fixed_code: String,
    pub explanation: String,
    pub impact: String,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_error: Option<String>,
    /// The engine only saw the head of `file`, so `fixed_code` cannot
    /// replace the whole file
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial_source: bool,
}

impl Issue {
    /// Give a draft a fresh id and the `open` status
    pub fn from_draft(draft: DraftIssue) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            issue_type: draft.issue_type,
            severity: draft.severity,
            title: draft.title,
            description: draft.description,
            file: draft.file,
            line: draft.line,
            original_code: draft.original_code,
            fixed_code: draft.fixed_code,
            explanation: draft.explanation,
            impact: draft.impact,
            status: IssueStatus::Open,
            pr_url: None,
            fix_error: None,
            partial_source: false,
        }
    }

    /// Move to `next`, rejecting transitions the status machine forbids
    pub fn transition(&mut self, next: IssueStatus) -> RepairResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RepairError::InvalidTransition {
                issue_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Scanned,
    Error,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Scanned => "scanned",
            ScanStatus::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate counts, always recomputed from the issue list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub total_files: u32,
    pub total_lines: u32,
}

impl ScanStats {
    pub fn from_issues(issues: &[Issue], total_files: u32, total_lines: u32) -> Self {
        let mut stats = ScanStats {
            total_files,
            total_lines,
            ..Default::default()
        };
        for issue in issues {
            match issue.severity {
                Severity::Critical => stats.critical += 1,
                Severity::High => stats.high += 1,
                Severity::Medium => stats.medium += 1,
                Severity::Low => stats.low += 1,
            }
        }
        stats
    }

    pub fn total_issues(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub user_id: String,
    pub target: ScanTarget,
    pub engine: Engine,
    pub status: ScanStatus,
    pub issues: Vec<Issue>,
    pub stats: ScanStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanResult {
    pub fn new(user_id: impl Into<String>, target: ScanTarget, engine: Engine) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            target,
            engine,
            status: ScanStatus::Pending,
            issues: Vec::new(),
            stats: ScanStats::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_scanning(&mut self) {
        self.status = ScanStatus::Scanning;
        self.updated_at = Utc::now();
    }

    /// Store the issues and recompute the aggregate counts
    pub fn complete(&mut self, issues: Vec<Issue>, total_files: u32, total_lines: u32) {
        self.stats = ScanStats::from_issues(&issues, total_files, total_lines);
        self.issues = issues;
        self.status = ScanStatus::Scanned;
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ScanStatus::Error;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn issue(&self, issue_id: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.id == issue_id)
    }

    pub fn issue_mut(&mut self, issue_id: &str) -> Option<&mut Issue> {
        self.issues.iter_mut().find(|i| i.id == issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(severity: Severity) -> DraftIssue {
        DraftIssue {
            issue_type: IssueType::Crash,
            severity,
            title: "Null dereference".to_string(),
            description: "value may be null".to_string(),
            file: "src/app.js".to_string(),
            line: Some(12),
            original_code: "a.b".to_string(),
            fixed_code: "a?.b".to_string(),
            explanation: "guard the access".to_string(),
            impact: "crash on launch".to_string(),
        }
    }

    #[test]
    fn test_issue_status_machine() {
        let mut issue = Issue::from_draft(draft(Severity::High));
        assert_eq!(issue.status, IssueStatus::Open);

        issue.transition(IssueStatus::Fixing).unwrap();
        issue.transition(IssueStatus::Open).unwrap();
        issue.transition(IssueStatus::Fixing).unwrap();
        issue.transition(IssueStatus::Fixed).unwrap();

        let err = issue.transition(IssueStatus::Fixing).unwrap_err();
        assert!(matches!(err, RepairError::InvalidTransition { .. }));
        assert_eq!(issue.status, IssueStatus::Fixed);
    }

    #[test]
    fn test_dismissed_is_terminal() {
        let mut issue = Issue::from_draft(draft(Severity::Low));
        issue.transition(IssueStatus::Dismissed).unwrap();

        for next in [IssueStatus::Open, IssueStatus::Fixing, IssueStatus::Fixed] {
            assert!(issue.transition(next).is_err());
        }
    }

    #[test]
    fn test_fixing_requires_open() {
        assert!(!IssueStatus::Fixed.can_transition_to(IssueStatus::Fixing));
        assert!(!IssueStatus::Dismissed.can_transition_to(IssueStatus::Fixing));
        assert!(!IssueStatus::Open.can_transition_to(IssueStatus::Fixed));
    }

    #[test]
    fn test_stats_match_issue_count() {
        let issues: Vec<Issue> = [
            Severity::Critical,
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
            Severity::Low,
        ]
        .into_iter()
        .map(|s| Issue::from_draft(draft(s)))
        .collect();

        let stats = ScanStats::from_issues(&issues, 4, 120);
        assert_eq!(stats.critical, 2);
        assert_eq!(stats.high, 1);
        assert_eq!(stats.medium, 1);
        assert_eq!(stats.low, 2);
        assert_eq!(stats.total_issues() as usize, issues.len());
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.total_lines, 120);
    }

    #[test]
    fn test_issue_ids_are_unique() {
        let a = Issue::from_draft(draft(Severity::Low));
        let b = Issue::from_draft(draft(Severity::Low));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_quota_check() {
        let mut user = User::new("u1", Plan::Free);
        user.usage.scans_used = 5;
        let err = user.check_quota(QuotaKind::Scans).unwrap_err();
        assert!(matches!(err, RepairError::QuotaExceeded { kind: QuotaKind::Scans, limit: 5 }));
        assert!(user.check_quota(QuotaKind::Fixes).is_ok());

        let mut unlimited = User::new("u2", Plan::Enterprise);
        unlimited.usage.scans_used = 10_000;
        assert!(unlimited.check_quota(QuotaKind::Scans).is_ok());
    }

    #[test]
    fn test_usage_period_roll() {
        let start = Utc::now() - Duration::days(31);
        let mut usage = Usage {
            scans_used: 4,
            fixes_used: 2,
            period_start: start,
        };
        assert!(usage.roll_period(Utc::now()));
        assert_eq!(usage.scans_used, 0);
        assert_eq!(usage.fixes_used, 0);

        let mut fresh = Usage {
            scans_used: 4,
            fixes_used: 2,
            period_start: Utc::now(),
        };
        assert!(!fresh.roll_period(Utc::now()));
        assert_eq!(fresh.scans_used, 4);
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Medium);
        assert_eq!(IssueType::parse_lenient("memory-leak"), IssueType::MemoryLeak);
        assert_eq!(IssueType::parse_lenient("ANR"), IssueType::Anr);
        assert_eq!(IssueType::parse_lenient("style"), IssueType::Warning);
    }

    #[test]
    fn test_plan_ordering_and_parse() {
        assert!(Plan::Free < Plan::Starter);
        assert!(Plan::Pro < Plan::Enterprise);
        assert_eq!("Pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert!("platinum".parse::<Plan>().is_err());
    }

    #[test]
    fn test_blank_token_is_no_credential() {
        let user = User::new("u1", Plan::Free).with_token("   ");
        assert!(user.credential().is_none());
        let user = User::new("u1", Plan::Free).with_token("ghp_abc");
        assert_eq!(user.credential(), Some("ghp_abc"));
    }
}
