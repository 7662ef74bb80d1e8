use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::time::Duration;

use crate::shared::config::LlmConfig;

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
    pub usage: Option<Value>,
}

impl LlmResponse {
    pub fn ok(content: String, usage: Option<Value>) -> Self {
        Self {
            content,
            success: true,
            error: None,
            usage,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            success: false,
            error: Some(error.into()),
            usage: None,
        }
    }
}

/// Completion interface the agents consume. Implementations own their
/// timeout; callers treat `success == false` as a failed call, never a panic.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> LlmResponse;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout_seconds: u64,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout_seconds: config.timeout_seconds,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> LlmResponse {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user_prompt}));

        debug!("Calling LLM model {} with {} messages", self.model, messages.len());

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(self.timeout_seconds))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "temperature": temperature,
                "max_tokens": max_tokens
            }));

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM request failed: {e}");
                return LlmResponse::err(format!("LLM request failed: {e}"));
            }
        };

        if !response.status().is_success() {
            return LlmResponse::err(format!("LLM API error: {}", response.status()));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return LlmResponse::err(format!("Invalid LLM response: {e}")),
        };

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.is_empty() {
            return LlmResponse::err("LLM returned empty content");
        }

        let usage = body.get("usage").cloned();
        LlmResponse::ok(content, usage)
    }
}

/// Extract the first JSON object embedded in a possibly noisy response.
pub fn extract_json_object(content: &str) -> Option<Value> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end])
        .ok()
        .or_else(|| serde_json::from_str(content).ok())
}

/// Extract a SQL statement from an LLM response: strip code fences and
/// comment lines, collapse to one line, drop a trailing semicolon.
pub fn extract_sql(content: &str) -> String {
    let mut text = content.trim();

    if let Some(stripped) = text.strip_prefix("```sql") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }

    let sql_lines: Vec<&str> = text
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with("--") && !line.starts_with('#'))
        .collect();

    let mut sql = sql_lines.join(" ").trim().to_string();
    while sql.ends_with(';') {
        sql.pop();
        sql = sql.trim_end().to_string();
    }
    sql
}
