//! Error types for scan and fix operations
//!
//! Every failure the pipeline can surface to a caller is one variant of
//! [`RepairError`]. None of them are retried by the core.

use std::fmt;
use thiserror::Error;

use crate::analyzer::Engine;
use crate::models::Plan;

/// Which plan-based counter a quota error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    Scans,
    Fixes,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaKind::Scans => write!(f, "scan"),
            QuotaKind::Fixes => write!(f, "fix"),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

/// Main error type for the repair pipeline
#[derive(Debug, Error)]
pub enum RepairError {
    /// The submitted string is not a GitHub repository URL
    #[error("Invalid repository URL: {url}")]
    InvalidUrl { url: String },

    /// The repository host could not be reached or refused the request
    #[error("Repository unreachable{}: {message}", status_suffix(.status))]
    RepositoryUnreachable {
        status: Option<u16>,
        message: String,
    },

    /// The analysis engine failed or returned something unusable
    #[error("Analysis failed: {message}")]
    AnalysisFailed { message: String },

    /// The user's plan does not allow another scan or fix this period
    #[error("{kind} quota exceeded: limit is {limit} per period")]
    QuotaExceeded { kind: QuotaKind, limit: u32 },

    /// The requested engine needs a higher plan
    #[error("Engine '{engine}' is not available on the {plan} plan")]
    EngineNotPermitted { engine: Engine, plan: Plan },

    /// No repository host token is stored for the user
    #[error("No repository credential stored for user '{user_id}'")]
    MissingCredential { user_id: String },

    /// A user, scan or issue does not exist (for this user)
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// An issue status change that the status machine forbids
    #[error("Issue '{issue_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        issue_id: String,
        from: String,
        to: String,
    },

    /// Persistence failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration is missing or malformed
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl RepairError {
    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Create a repository unreachable error
    pub fn unreachable(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RepositoryUnreachable {
            status,
            message: message.into(),
        }
    }

    /// Create an analysis failure
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::AnalysisFailed {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Upstream HTTP status carried by a repository error, if any
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::RepositoryUnreachable { status, .. } => *status,
            _ => None,
        }
    }

    /// True when the repository host reported a missing resource
    pub fn is_not_found_upstream(&self) -> bool {
        self.upstream_status() == Some(404)
    }
}

/// Result type for pipeline operations
pub type RepairResult<T> = Result<T, RepairError>;

/// Convert from standard IO errors (file store)
impl From<std::io::Error> for RepairError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Convert from JSON errors (file store documents)
impl From<serde_json::Error> for RepairError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}
