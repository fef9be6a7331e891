//! Premium engine on Anthropic's messages API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::prompt::{self, SYSTEM_PROMPT};
use super::{AnalysisRequest, Engine, IssueAnalyzer, resolve_api_key};
use crate::error::{RepairError, RepairResult};
use crate::models::DraftIssue;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    /// Inline key; takes precedence over `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.2,
            timeout_secs: 180,
        }
    }
}

/// Analyzer backed by Claude
pub struct ClaudeAnalyzer {
    client: Client,
    config: ClaudeConfig,
    max_file_bytes: usize,
}

impl ClaudeAnalyzer {
    pub fn new(config: ClaudeConfig, max_file_bytes: usize) -> RepairResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepairError::config(format!("failed to build Claude client: {}", e)))?;

        Ok(Self {
            client,
            config,
            max_file_bytes,
        })
    }

    async fn create_message(&self, user_prompt: String) -> RepairResult<String> {
        let api_key = resolve_api_key(
            self.config.api_key.as_deref(),
            &self.config.api_key_env,
            Engine::Claude,
        )
        .map_err(|e| RepairError::analysis(e.to_string()))?;

        let request = MessageRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user_prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: Some(SYSTEM_PROMPT.to_string()),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url.trim_end_matches('/')))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                RepairError::analysis(format!("failed to send request to Claude: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepairError::analysis(format!(
                "Claude API error ({}): {}",
                status,
                prompt::truncate_at_char_boundary(error_text.trim(), 300)
            )));
        }

        let result: MessageResponse = response
            .json()
            .await
            .map_err(|e| RepairError::analysis(format!("failed to parse Claude response: {}", e)))?;

        let text: String = result
            .content
            .into_iter()
            .filter_map(|block| match block {
                Content::Text { text } => Some(text),
                Content::Other => None,
            })
            .collect();

        if text.trim().is_empty() {
            return Err(RepairError::analysis("no response from Claude"));
        }
        Ok(text)
    }
}

#[async_trait]
impl IssueAnalyzer for ClaudeAnalyzer {
    fn engine(&self) -> Engine {
        Engine::Claude
    }

    async fn analyze(&self, request: &AnalysisRequest) -> RepairResult<Vec<DraftIssue>> {
        debug!(model = %self.config.model, files = request.files.len(), "Calling Claude");
        let prompt = prompt::build_prompt(request, self.max_file_bytes);
        let response = self.create_message(prompt).await?;
        let issues = prompt::parse_issues(&response)?;
        info!(engine = "claude", issues = issues.len(), "Analysis finished");
        Ok(issues)
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Content {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}
