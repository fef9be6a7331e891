//! Progress notifications for scans and fixes
//!
//! Delivery is best effort: publishing never fails and never blocks the
//! pipeline, and events sent with no subscriber are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::ScanResult;

const CHANNEL_CAPACITY: usize = 100;

/// Progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Scanning {
        scan_id: String,
        repository: String,
        timestamp: DateTime<Utc>,
    },
    Analyzing {
        scan_id: String,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },
    ScanCompleted {
        result: Box<ScanResult>,
        timestamp: DateTime<Utc>,
    },
    ScanFailed {
        scan_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    FixStarted {
        scan_id: String,
        issue_id: String,
        timestamp: DateTime<Utc>,
    },
    FixCompleted {
        scan_id: String,
        issue_id: String,
        pr_url: String,
        timestamp: DateTime<Utc>,
    },
    FixFailed {
        scan_id: String,
        issue_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Scan this event belongs to
    pub fn scan_id(&self) -> &str {
        match self {
            ProgressEvent::Scanning { scan_id, .. }
            | ProgressEvent::Analyzing { scan_id, .. }
            | ProgressEvent::ScanFailed { scan_id, .. }
            | ProgressEvent::FixStarted { scan_id, .. }
            | ProgressEvent::FixCompleted { scan_id, .. }
            | ProgressEvent::FixFailed { scan_id, .. } => scan_id,
            ProgressEvent::ScanCompleted { result, .. } => &result.id,
        }
    }

    /// Short status line for console output
    pub fn describe(&self) -> String {
        match self {
            ProgressEvent::Scanning { repository, .. } => format!("Scanning {}", repository),
            ProgressEvent::Analyzing { file_count, .. } => {
                format!("Analyzing {} file(s)", file_count)
            }
            ProgressEvent::ScanCompleted { result, .. } => {
                format!("Scan complete: {} issue(s)", result.stats.total_issues())
            }
            ProgressEvent::ScanFailed { error, .. } => format!("Scan failed: {}", error),
            ProgressEvent::FixStarted { issue_id, .. } => format!("Applying fix for {}", issue_id),
            ProgressEvent::FixCompleted { pr_url, .. } => {
                format!("Pull request opened: {}", pr_url)
            }
            ProgressEvent::FixFailed { error, .. } => format!("Fix failed: {}", error),
        }
    }
}

/// An event addressed to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: String,
    pub event: ProgressEvent,
}

/// Sink for progress events
pub trait ProgressNotifier: Send + Sync {
    /// Fire and forget
    fn publish(&self, user_id: &str, event: ProgressEvent);
}

/// Notifier backed by a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<UserEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to events for every user
    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn publish(&self, user_id: &str, event: ProgressEvent) {
        trace!(user_id, scan_id = event.scan_id(), "Publishing progress event");
        // No receivers is not an error
        let _ = self.sender.send(UserEvent {
            user_id: user_id.to_string(),
            event,
        });
    }
}

/// Notifier that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
    fn publish(&self, _user_id: &str, _event: ProgressEvent) {}
}
