//! Core functionality for repairbot
//!
//! This crate contains the scan-and-fix pipeline: repository URL parsing,
//! file listing and download through a repository host, platform
//! detection, AI issue analysis, persistence of scan results and
//! pull-request creation for suggested fixes.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod platform;
pub mod repo;
pub mod store;
pub mod url;

pub use analyzer::{AnalyzerSet, Engine, IssueAnalyzer};
pub use config::RepairBotConfig;
pub use error::{QuotaKind, RepairError, RepairResult};
pub use models::{Issue, IssueStatus, Plan, ScanResult, ScanStatus, Severity, User};
pub use notify::{BroadcastNotifier, ProgressEvent, ProgressNotifier};
pub use pipeline::RepairPipeline;
pub use platform::{Platform, detect_platform};
pub use repo::{GitHubClient, RepositoryHost};
pub use store::{FileStore, MemoryStore, ScanStore, UserStore};
