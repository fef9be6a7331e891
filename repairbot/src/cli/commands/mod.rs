//! Command handlers

pub mod fix;
pub mod history;
pub mod init;
pub mod profile;
pub mod scan;

use anyhow::{Context, Result};
use repairbot_core::{
    AnalyzerSet, BroadcastNotifier, FileStore, GitHubClient, Plan, RepairBotConfig, RepairError,
    RepairPipeline, User, UserStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// What every command needs: configuration, the local store and the profile id
pub struct Session {
    pub config: RepairBotConfig,
    pub store: Arc<FileStore>,
    pub user_id: String,
}

impl Session {
    pub fn open(config_path: Option<&PathBuf>, user_id: &str) -> Result<Self> {
        let config = RepairBotConfig::load_or_default(config_path.map(PathBuf::as_path))
            .context("Failed to load configuration")?;
        debug!("Using data directory {}", config.storage.data_dir.display());

        let store = Arc::new(FileStore::new(config.storage.data_dir.clone()));
        Ok(Self {
            config,
            store,
            user_id: user_id.to_string(),
        })
    }

    /// The current profile, created on the free plan the first time
    pub async fn profile(&self) -> Result<User> {
        match self.store.get_user(&self.user_id).await {
            Ok(user) => Ok(user),
            Err(RepairError::NotFound { .. }) => {
                info!("Creating profile '{}' on the free plan", self.user_id);
                let user = User::new(&self.user_id, Plan::Free);
                self.store.save_user(&user).await.context("Failed to save profile")?;
                Ok(user)
            }
            Err(e) => Err(e).context("Failed to load profile"),
        }
    }

    /// Build the pipeline with the GitHub client and both engines
    pub fn pipeline(&self, notifier: Arc<BroadcastNotifier>) -> Result<RepairPipeline> {
        let host =
            GitHubClient::new(&self.config.github).context("Failed to create GitHub client")?;
        let analyzers = AnalyzerSet::from_config(&self.config.engines, &self.config.scan)
            .context("Failed to configure analysis engines")?;

        Ok(RepairPipeline::new(Arc::new(host), analyzers, self.store.clone())
            .with_notifier(notifier)
            .with_settings(self.config.scan.clone()))
    }
}

/// First `max` chars of `text`, with an ellipsis when cut
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
