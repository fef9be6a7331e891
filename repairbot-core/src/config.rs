//! Configuration for the repair pipeline
//!
//! Loaded from a TOML file; every section and field has a default so a
//! partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::analyzer::claude::ClaudeConfig;
use crate::analyzer::openai_compat::OpenAICompatConfig;
use crate::error::{RepairError, RepairResult};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairBotConfig {
    pub github: GitHubConfig,
    pub scan: ScanSettings,
    pub engines: EnginesConfig,
    pub storage: StorageConfig,
}

impl RepairBotConfig {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> RepairResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RepairError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            RepairError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load `path` when given, else the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> RepairResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> RepairResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RepairError::config(format!("failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `<config dir>/repairbot/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("repairbot").join("config.toml"))
    }
}

/// Repository host settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// REST API root; point at `/api/v3` for GitHub Enterprise
    pub api_base: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Prefix for fix branches
    pub branch_prefix: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            timeout_secs: 30,
            branch_prefix: "repairbot".to_string(),
        }
    }
}

/// Limits applied by the scan orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Code files fetched per scan
    pub max_files: usize,
    /// Bytes of each file handed to the engine
    pub max_file_bytes: usize,
    /// Upper bound for one engine call
    pub analysis_timeout_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_bytes: 12_000,
            analysis_timeout_secs: 180,
        }
    }
}

/// Engine provider settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    pub groq: OpenAICompatConfig,
    pub claude: ClaudeConfig,
}

/// Where the file store keeps its documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|dir| dir.join("repairbot"))
            .unwrap_or_else(|| PathBuf::from(".repairbot"));
        Self { data_dir }
    }
}
