//! OpenAI-compatible analysis backend
//!
//! Sends each persona's analysis as a chat completion to any
//! OpenAI-compatible endpoint (OpenAI, Azure OpenAI proxies, Ollama, vLLM)
//! and asks for a JSON answer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::traits::{AnalysisBackend, AnalysisOutput};
use crate::error::{Error, Result};
use crate::persona::{AnalysisContext, PersonaProfile};

const BACKEND_NAME: &str = "openai";

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API base URL (e.g., "https://api.openai.com/v1", "http://localhost:11434/v1")
    pub base_url: String,

    /// API key (empty for local servers)
    pub api_key: String,

    pub model: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries on 429, 5xx and connection errors
    pub max_retries: u32,

    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            model: "llama3".to_string(),
            timeout_secs: 60,
            max_retries: 2,
            temperature: 0.2,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Prompt construction
// ─────────────────────────────────────────────────────────────────

const ANSWER_CONTRACT: &str = "Respond with a single JSON object and nothing else: \
{\"analysis\": string, \"confidence\": number between 0 and 1, \
\"recommendations\": [string], \"next_steps\": [string]}";

fn system_prompt(profile: &PersonaProfile) -> String {
    let mut prompt = format!(
        "{}\nYou are acting as '{}' ({} level) in the domain of {}.",
        profile.kind.system_prompt(),
        profile.name,
        profile.expertise_level,
        profile.domain
    );
    if !profile.certifications.is_empty() {
        prompt.push_str(&format!("\nCertifications: {}.", profile.certifications.join(", ")));
    }
    if !profile.decision_rules.is_empty() {
        prompt.push_str("\nDecision rules:");
        for rule in &profile.decision_rules {
            prompt.push_str(&format!("\n- {}", rule));
        }
    }
    prompt.push('\n');
    prompt.push_str(ANSWER_CONTRACT);
    prompt
}

fn user_prompt(query: &str, context: &AnalysisContext) -> String {
    let mut prompt = format!("Question: {}", query);
    if !context.is_empty() {
        prompt.push_str("\n\nContext:");
        for (k, v) in context {
            prompt.push_str(&format!("\n{}: {}", k, v));
        }
    }
    prompt
}

/// Parse the model's reply, tolerating a fenced code block around it.
fn parse_answer(content: &str) -> Result<AnalysisOutput> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut output: AnalysisOutput = serde_json::from_str(body).map_err(|e| {
        Error::backend(BACKEND_NAME, format!("Reply is not the expected JSON: {}", e))
    })?;
    if !output.confidence.is_finite() {
        output.confidence = 0.0;
    }
    output.confidence = output.confidence.clamp(0.0, 1.0);
    Ok(output)
}

// ─────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────

pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::backend(BACKEND_NAME, format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, model = %config.model, "OpenAI-compatible backend created");

        Ok(Self { config, client })
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request_body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut last_error: Option<Error> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                debug!(attempt, ?backoff, "Retrying after error");
                tokio::time::sleep(backoff).await;
            }

            let mut req = self.client.post(&url).json(&request_body);
            if let Some(ref auth) = self.auth_header() {
                req = req.header("Authorization", auth);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
                            Error::backend(BACKEND_NAME, format!("Failed to parse API response: {}", e))
                        })?;
                        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                            Error::backend(BACKEND_NAME, "No choices in API response")
                        })?;
                        return Ok(choice.message.content.unwrap_or_default());
                    } else if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "Retryable API error: {}", body);
                        last_error = Some(Error::backend(
                            BACKEND_NAME,
                            format!("API error {}: {}", status, body),
                        ));
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::backend(
                            BACKEND_NAME,
                            format!("API error {}: {}", status, body),
                        ));
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(attempt, error = %e, "Retryable connection error");
                    last_error = Some(Error::backend(BACKEND_NAME, format!("Connection error: {}", e)));
                }
                Err(e) => {
                    return Err(Error::backend(BACKEND_NAME, format!("Request error: {}", e)));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::backend(BACKEND_NAME, "All retry attempts exhausted")))
    }
}

#[async_trait]
impl AnalysisBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn analyze(
        &self,
        profile: &PersonaProfile,
        query: &str,
        context: &AnalysisContext,
    ) -> Result<AnalysisOutput> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: system_prompt(profile),
            },
            ChatMessage {
                role: "user",
                content: user_prompt(query, context),
            },
        ];

        let content = self.chat_completion(messages).await?;
        parse_answer(&content).map_err(|e| match e {
            Error::Backend { message, .. } => Error::PersonaFailed {
                persona: profile.id.clone(),
                message,
            },
            other => other,
        })
    }
}
