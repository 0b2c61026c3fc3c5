//! LLM integration over an OpenAI-compatible chat completions API
//! Provides the vision extractor and chat assistant used by review sessions

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};
use url::Url;

use crate::review::collaborators::{ChatAssistant, ChatRequest, VisionExtraction, VisionExtractor};
use crate::review::prompts::ReviewPrompts;
use crate::review::types::Prediction;

/// LLM response with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

impl LLMResponse {
    /// Token accounting line for logs; `?` where the API reported no usage
    pub fn usage_summary(&self) -> String {
        let count = |tokens: Option<usize>| tokens.map_or_else(|| "?".to_string(), |t| t.to_string());
        format!(
            "LLM {} used {} tokens (prompt {}, completion {})",
            self.model,
            count(self.total_tokens),
            count(self.prompt_tokens),
            count(self.completion_tokens)
        )
    }
}

/// LLM client configuration
#[derive(Debug, Clone)]
pub struct LLMConfig {
    /// Base URL; `/chat/completions` is appended
    pub api_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub vision_model: String,
    pub timeout_seconds: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key: None,
            chat_model: "qwen-vl-plus".to_string(),
            vision_model: "qwen-vl-plus".to_string(),
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
    total_tokens: Option<usize>,
}

/// LLM client for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct LLMClient {
    http: reqwest::Client,
    endpoint: Url,
    config: LLMConfig,
}

impl LLMClient {
    /// Create new LLM client with configuration
    pub fn new(config: LLMConfig) -> Result<Self> {
        let base = Url::parse(config.api_url.trim_end_matches('/'))
            .context("Invalid LLM API URL")?;
        let endpoint = Url::parse(&format!("{}/chat/completions", base.as_str().trim_end_matches('/')))
            .context("Invalid LLM completions endpoint")?;

        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        info!(
            "LLM client ready (endpoint {}, chat model '{}', vision model '{}')",
            endpoint, config.chat_model, config.vision_model
        );

        Ok(Self {
            http,
            endpoint,
            config,
        })
    }

    /// Create client from config::Config
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Self::new(LLMConfig {
            api_url: config.llm.api_url.clone(),
            api_key: config.llm.api_key.clone(),
            chat_model: config.llm.chat_model.clone(),
            vision_model: config.llm.vision_model.clone(),
            timeout_seconds: config.llm.timeout_seconds,
        })
    }

    /// Send one chat completion request. Single attempt, bounded by the
    /// configured timeout.
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<Value>,
        temperature: f32,
    ) -> Result<LLMResponse> {
        info!("Requesting completion from model '{}' ({} messages)", model, messages.len());

        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": 2000,
        });

        let mut request = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = match timeout(
            Duration::from_secs(self.config.timeout_seconds),
            request.send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("LLM API request failed: {}", e);
                return Err(anyhow::anyhow!("LLM API request failed: {}", e));
            }
            Err(_) => {
                error!("LLM API timeout after {} seconds", self.config.timeout_seconds);
                return Err(anyhow::anyhow!(
                    "Request timeout after {} seconds",
                    self.config.timeout_seconds
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("LLM API returned {}: {}", status, text);
            return Err(anyhow::anyhow!("LLM API error {}: {}", status, text));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM API response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("LLM API returned no content"))?;

        let usage = parsed.usage;
        let response = LLMResponse {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: usage.as_ref().and_then(|u| u.completion_tokens),
            total_tokens: usage.as_ref().and_then(|u| u.total_tokens),
        };
        info!("{}", response.usage_summary());
        Ok(response)
    }

    /// Completion parsed as structured JSON
    pub async fn complete_json<T>(
        &self,
        model: &str,
        messages: Vec<Value>,
        temperature: f32,
    ) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.complete(model, messages, temperature).await?;

        let json_content = extract_json_from_text(&response.content)
            .ok_or_else(|| anyhow::anyhow!("No valid JSON found in response"))?;

        serde_json::from_str(&json_content).context("Failed to parse JSON response")
    }
}

#[async_trait]
impl VisionExtractor for LLMClient {
    async fn extract_outcome(&self, image: &[u8], reference: &Prediction) -> Result<VisionExtraction> {
        let messages = vec![
            json!({"role": "system", "content": ReviewPrompts::vision_system_prompt()}),
            json!({
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": image_data_url(image)}},
                    {"type": "text", "text": ReviewPrompts::vision_user_prompt(reference)},
                ],
            }),
        ];

        // Low temperature for number reading
        self.complete_json(&self.config.vision_model, messages, 0.3)
            .await
            .context("Vision extraction failed")
    }
}

#[async_trait]
impl ChatAssistant for LLMClient {
    async fn converse(&self, request: ChatRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(json!({"role": "system", "content": request.system_prompt}));
        for message in &request.history {
            messages.push(json!({"role": message.role.to_string(), "content": message.text}));
        }

        let user = match &request.image {
            Some(image) => json!({
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": image_data_url(image)}},
                    {"type": "text", "text": request.user_text},
                ],
            }),
            None => json!({"role": "user", "content": request.user_text}),
        };
        messages.push(user);

        let model = if request.image.is_some() {
            &self.config.vision_model
        } else {
            &self.config.chat_model
        };

        let response = self.complete(model, messages, 0.7).await?;
        Ok(response.content)
    }
}

/// Inline image as a base64 data URL; JPEG is sniffed, everything else is sent as PNG
pub fn image_data_url(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else {
        "image/png"
    };
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Extract JSON from text that might contain markdown or other formatting
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // First try to find JSON wrapped in markdown code blocks
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return Some(text[start + 7..start + 7 + end].trim().to_string());
        }
    }

    // Try to find JSON wrapped in regular code blocks
    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let potential_json = text[start + 3..start + 3 + end].trim();
            if potential_json.starts_with('{') || potential_json.starts_with('[') {
                return Some(potential_json.to_string());
            }
        }
    }

    // Look for JSON-like content (starts with {)
    if let Some(start) = text.find('{') {
        let mut brace_count = 0;
        let mut end_pos = start;

        for (i, c) in text[start..].char_indices() {
            match c {
                '{' => brace_count += 1,
                '}' => {
                    brace_count -= 1;
                    if brace_count == 0 {
                        end_pos = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }

        if brace_count == 0 {
            return Some(text[start..end_pos].to_string());
        }
    }

    None
}
