//! Standard engine on an OpenAI-compatible chat completions endpoint
//!
//! Defaults target Groq; any service speaking the same protocol works by
//! changing `base_url` and the auth header settings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::prompt::{self, SYSTEM_PROMPT};
use super::{AnalysisRequest, Engine, IssueAnalyzer, resolve_api_key};
use crate::error::{RepairError, RepairResult};
use crate::models::DraftIssue;

/// Configuration for OpenAI-compatible providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAICompatConfig {
    pub provider: String,
    pub base_url: String,
    /// Inline key; takes precedence over `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub auth_header: String,
    pub auth_prefix: String,
}

impl Default for OpenAICompatConfig {
    fn default() -> Self {
        Self::groq("llama-3.3-70b-versatile")
    }
}

impl OpenAICompatConfig {
    /// Create config for Groq
    pub fn groq(model: &str) -> Self {
        Self {
            provider: "groq".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            api_key_env: "GROQ_API_KEY".to_string(),
            model: model.to_string(),
            max_tokens: 8000,
            temperature: 0.2,
            timeout_secs: 120,
            auth_header: "Authorization".to_string(),
            auth_prefix: "Bearer".to_string(),
        }
    }
}

/// Analyzer for OpenAI-compatible services
pub struct OpenAICompatAnalyzer {
    client: Client,
    config: OpenAICompatConfig,
    max_file_bytes: usize,
}

impl OpenAICompatAnalyzer {
    pub fn new(config: OpenAICompatConfig, max_file_bytes: usize) -> RepairResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                RepairError::config(format!("failed to build {} client: {}", config.provider, e))
            })?;

        Ok(Self {
            client,
            config,
            max_file_bytes,
        })
    }

    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> RepairResult<String> {
        let provider = &self.config.provider;
        let api_key =
            resolve_api_key(self.config.api_key.as_deref(), &self.config.api_key_env, Engine::Groq)
                .map_err(|e| RepairError::analysis(e.to_string()))?;

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')));

        if self.config.auth_prefix.is_empty() {
            req = req.header(&self.config.auth_header, api_key);
        } else {
            let value = format!("{} {}", self.config.auth_prefix, api_key);
            req = req.header(&self.config.auth_header, value);
        }

        let response = req.json(&request).send().await.map_err(|e| {
            RepairError::analysis(format!("failed to send request to {}: {}", provider, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RepairError::analysis(format!(
                "{} API error ({}): {}",
                provider,
                status,
                prompt::truncate_at_char_boundary(error_text.trim(), 300)
            )));
        }

        let result: ChatCompletionResponse = response.json().await.map_err(|e| {
            RepairError::analysis(format!("failed to parse {} response: {}", provider, e))
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| RepairError::analysis(format!("no response from {}", provider)))
    }
}

#[async_trait]
impl IssueAnalyzer for OpenAICompatAnalyzer {
    fn engine(&self) -> Engine {
        Engine::Groq
    }

    async fn analyze(&self, request: &AnalysisRequest) -> RepairResult<Vec<DraftIssue>> {
        debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            files = request.files.len(),
            "Calling chat completions"
        );

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: Some(SYSTEM_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: Some(prompt::build_prompt(request, self.max_file_bytes)),
            },
        ];

        let response = self.chat_completion(messages).await?;
        let issues = prompt::parse_issues(&response)?;
        info!(engine = "groq", issues = issues.len(), "Analysis finished");
        Ok(issues)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}
