//! Issue analysis engines
//!
//! An engine turns a bounded set of source files into structured issues.
//! Engines are selected with the [`Engine`] enum and looked up in an
//! [`AnalyzerSet`]; the pipeline never dispatches on raw strings.

pub mod claude;
pub mod openai_compat;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{EnginesConfig, ScanSettings};
use crate::error::{RepairError, RepairResult};
use crate::models::{DraftIssue, Plan};
use crate::platform::Platform;

pub use claude::ClaudeAnalyzer;
pub use openai_compat::OpenAICompatAnalyzer;

/// Selectable analysis back-end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Fast engine on an OpenAI-compatible endpoint, available to every plan
    #[default]
    Groq,
    /// Premium engine on Anthropic's messages API
    Claude,
}

impl Engine {
    pub const ALL: [Engine; 2] = [Engine::Groq, Engine::Claude];

    /// Lowest plan allowed to use this engine
    pub fn required_plan(&self) -> Plan {
        match self {
            Engine::Groq => Plan::Free,
            Engine::Claude => Plan::Pro,
        }
    }

    pub fn is_permitted_for(&self, plan: Plan) -> bool {
        plan >= self.required_plan()
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Groq => write!(f, "groq"),
            Engine::Claude => write!(f, "claude"),
        }
    }
}

impl FromStr for Engine {
    type Err = RepairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Engine::Groq),
            "claude" => Ok(Engine::Claude),
            other => Err(RepairError::config(format!(
                "unknown engine '{}' (expected one of: groq, claude)",
                other
            ))),
        }
    }
}

/// A downloaded file handed to an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

/// Input of one analysis call
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub files: Vec<SourceFile>,
    pub platform: Platform,
}

/// Core trait for analysis engines
#[async_trait]
pub trait IssueAnalyzer: Send + Sync {
    /// Which engine this is
    fn engine(&self) -> Engine;

    /// Return zero or more issues, or fail with `AnalysisFailed`
    async fn analyze(&self, request: &AnalysisRequest) -> RepairResult<Vec<DraftIssue>>;
}

/// Inline key first, then the named environment variable
pub(crate) fn resolve_api_key(
    inline: Option<&str>,
    env_var: &str,
    engine: Engine,
) -> RepairResult<String> {
    if let Some(key) = inline.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    std::env::var(env_var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            RepairError::config(format!("{} API key not found (set {})", engine, env_var))
        })
}

/// Engine registry used by the scan orchestrator
#[derive(Clone, Default)]
pub struct AnalyzerSet {
    analyzers: HashMap<Engine, Arc<dyn IssueAnalyzer>>,
}

impl AnalyzerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both HTTP engines from configuration
    pub fn from_config(engines: &EnginesConfig, scan: &ScanSettings) -> RepairResult<Self> {
        let groq = OpenAICompatAnalyzer::new(engines.groq.clone(), scan.max_file_bytes)?;
        let claude = ClaudeAnalyzer::new(engines.claude.clone(), scan.max_file_bytes)?;

        Ok(Self::new().with(Arc::new(groq)).with(Arc::new(claude)))
    }

    /// Register an analyzer under its own engine tag, replacing any previous one
    pub fn with(mut self, analyzer: Arc<dyn IssueAnalyzer>) -> Self {
        self.analyzers.insert(analyzer.engine(), analyzer);
        self
    }

    pub fn get(&self, engine: Engine) -> RepairResult<Arc<dyn IssueAnalyzer>> {
        self.analyzers
            .get(&engine)
            .cloned()
            .ok_or_else(|| RepairError::config(format!("engine '{}' is not configured", engine)))
    }

    pub fn engines(&self) -> Vec<Engine> {
        Engine::ALL.into_iter().filter(|e| self.analyzers.contains_key(e)).collect()
    }
}
