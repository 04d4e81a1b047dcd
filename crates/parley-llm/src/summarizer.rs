use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use parley_core::errors::SummarizationError;
use parley_core::messages::Message;
use parley_core::summarizer::{render_transcript, Summarizer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const API_VERSION: &str = "2023-06-01";
pub const SUMMARY_MAX_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = "You are a conversation summarizer. Your task is to create a concise but comprehensive summary of the conversation history.
Focus on:
- Key topics discussed
- Important decisions or conclusions reached
- Any pending questions or tasks
- Context that would be needed to continue the conversation

Keep the summary under 500 words. Be factual and objective.";

#[derive(Clone, Debug)]
pub struct SummarizerConfig {
    /// Messages-API compatible endpoint, e.g. `https://api.anthropic.com/v1/messages`.
    pub endpoint: String,
    pub model: String,
    pub api_key: SecretString,
}

#[derive(Serialize)]
struct SummaryRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [PromptMessage; 1],
}

#[derive(Serialize)]
struct PromptMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Summarizer backed by a Messages-API model call.
pub struct MessagesApiSummarizer {
    client: Client,
    config: SummarizerConfig,
}

impl MessagesApiSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SummarizationError::Transport(format!("build client: {e}")))?;
        Ok(Self { client, config })
    }

    fn request<'a>(&'a self, transcript: &str) -> SummaryRequest<'a> {
        SummaryRequest {
            model: &self.config.model,
            max_tokens: SUMMARY_MAX_TOKENS,
            system: SYSTEM_PROMPT,
            messages: [PromptMessage {
                role: "user",
                content: user_prompt(transcript),
            }],
        }
    }
}

fn user_prompt(transcript: &str) -> String {
    format!(
        "Please summarize the following conversation:\n\n{transcript}\n\n\
         Provide a concise summary that captures the essential context needed to continue this conversation."
    )
}

/// First content block's text. No content at all is an error.
fn extract_summary(body: &str) -> Result<String, SummarizationError> {
    let parsed: SummaryResponse = serde_json::from_str(body)
        .map_err(|e| SummarizationError::InvalidResponse(e.to_string()))?;
    parsed
        .content
        .into_iter()
        .next()
        .map(|block| block.text)
        .ok_or(SummarizationError::EmptyResponse)
}

#[async_trait]
impl Summarizer for MessagesApiSummarizer {
    #[instrument(skip_all, fields(messages = messages.len()))]
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummarizationError> {
        if messages.is_empty() {
            return Ok(String::new());
        }
        let transcript = render_transcript(messages);

        let resp = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&self.request(&transcript))
            .send()
            .await
            .map_err(|e| SummarizationError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SummarizationError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SummarizationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let summary = extract_summary(&body)?;
        info!(summary_chars = summary.chars().count(), "conversation summarized");
        Ok(summary)
    }
}
