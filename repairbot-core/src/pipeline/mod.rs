//! Scan and fix orchestration
//!
//! [`RepairPipeline`] owns the injected collaborators (repository host,
//! engines, stores, notifier) and exposes the request-level operations:
//! [`run_scan`](RepairPipeline::run_scan),
//! [`apply_fix`](RepairPipeline::apply_fix),
//! [`dismiss_issue`](RepairPipeline::dismiss_issue),
//! [`scan_history`](RepairPipeline::scan_history) and
//! [`get_scan`](RepairPipeline::get_scan).
//!
//! Each operation runs as one sequential task. Quota checks read the user
//! and the increment happens only after success, so two concurrent requests
//! from one user can each pass the check and overrun a limit by one.
//! Issue status writes are compare-and-set in the store, so only one of two
//! requests for the same issue gets past `open`.

use chrono::Utc;
use std::sync::Arc;

use crate::analyzer::AnalyzerSet;
use crate::config::ScanSettings;
use crate::error::{QuotaKind, RepairResult};
use crate::models::User;
use crate::notify::{NoopNotifier, ProgressNotifier};
use crate::repo::RepositoryHost;
use crate::store::{ScanStore, Store, UserStore};

mod fix;
mod scan;

#[cfg(test)]
pub(crate) mod testing;

/// The scan-and-fix pipeline
pub struct RepairPipeline {
    host: Arc<dyn RepositoryHost>,
    analyzers: AnalyzerSet,
    scans: Arc<dyn ScanStore>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn ProgressNotifier>,
    settings: ScanSettings,
}

impl RepairPipeline {
    pub fn new<S: Store + 'static>(
        host: Arc<dyn RepositoryHost>,
        analyzers: AnalyzerSet,
        store: Arc<S>,
    ) -> Self {
        Self {
            host,
            analyzers,
            scans: store.clone(),
            users: store,
            notifier: Arc::new(NoopNotifier),
            settings: ScanSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProgressNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Load a user, persisting a period reset, and check one quota
    async fn load_user_with_quota(&self, user_id: &str, kind: QuotaKind) -> RepairResult<User> {
        let mut user = self.users.get_user(user_id).await?;
        if user.usage.roll_period(Utc::now()) {
            self.users.save_user(&user).await?;
        }
        user.check_quota(kind)?;
        Ok(user)
    }
}
