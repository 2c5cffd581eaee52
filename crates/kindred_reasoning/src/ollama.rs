//! Ollama provider over the native `/api/chat` endpoint.
//!
//! Judges run with `format: "json"` and the low judge temperature. Replies and
//! prose use the normal temperature. Transport failures, bad statuses and
//! unparseable output all come back as `JudgeError`, which the callers turn
//! into their deterministic fallbacks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use kindred_core::config::LlmConfig;
use kindred_core::{
    ArchiveVerdict, ChatMessage, InteractionVerdict, Judge, JudgeError, MoodVerdict, PatternReport,
    PersonaBrief, QualityVerdict, Responder, Role, Summarizer,
};

use crate::extraction::{clean_prose, parse_verdict};
use crate::prompts;
use crate::retry::{with_retry, RetryConfig};

/// Hard ceiling for one HTTP exchange. Judge calls carry their own shorter deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const JUDGE_MAX_TOKENS: u32 = 350;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<WireReply>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    judge_temperature: f32,
    retry: RetryConfig,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .context("Failed to build HTTP client")?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            judge_temperature: config.judge_temperature,
            retry: RetryConfig::from_llm(config),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat round trip. Returns the assistant text.
    async fn chat(
        &self,
        system: &str,
        turns: &[(Role, &str)],
        json: bool,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: system,
        });
        messages.extend(turns.iter().map(|&(role, content)| WireMessage {
            role: role.as_str(),
            content,
        }));

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: json.then_some("json"),
            options: ChatOptions {
                temperature,
                num_predict: max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.base_url);

        let client = &self.client;
        let url = &url;
        let request = &request;
        let response = with_retry(&self.retry, "Ollama", move || async move {
            let resp = client
                .post(url)
                .json(request)
                .send()
                .await
                .context("Failed to send request to Ollama")?;
            Ok(resp)
        })
        .await?;

        let body: ChatResponse = response.json().await.context("Failed to decode Ollama response")?;
        if let Some(err) = body.error {
            anyhow::bail!("Ollama error: {}", err);
        }
        let text = body.message.map(|m| m.content).unwrap_or_default();
        tracing::debug!("Ollama replied with {} chars", text.len());
        Ok(text)
    }

    async fn judge<T: DeserializeOwned>(&self, system: &str, input: &str) -> Result<T, JudgeError> {
        let raw = self
            .chat(
                system,
                &[(Role::User, input)],
                true,
                self.judge_temperature,
                Some(JUDGE_MAX_TOKENS),
            )
            .await
            .map_err(unavailable)?;
        parse_verdict(&raw).map_err(|e| {
            tracing::debug!(
                "Unparseable judge output: {}",
                raw.chars().take(200).collect::<String>()
            );
            e
        })
    }

    async fn prose(&self, system: &str, input: &str) -> Result<String, JudgeError> {
        let raw = self
            .chat(system, &[(Role::User, input)], false, self.temperature, None)
            .await
            .map_err(unavailable)?;
        clean_prose(&raw)
    }
}

fn unavailable(e: anyhow::Error) -> JudgeError {
    JudgeError::Unavailable(format!("{:#}", e))
}

#[async_trait]
impl Judge for OllamaClient {
    async fn judge_interaction(
        &self,
        text: &str,
        context: &str,
    ) -> Result<InteractionVerdict, JudgeError> {
        self.judge(prompts::INTERACTION_SYSTEM, &prompts::message_input(text, context))
            .await
    }

    async fn judge_mood(&self, text: &str, context: &str) -> Result<MoodVerdict, JudgeError> {
        self.judge(prompts::MOOD_SYSTEM, &prompts::message_input(text, context))
            .await
    }

    async fn archive_turn(
        &self,
        user_text: &str,
        reply: &str,
        context: &str,
    ) -> Result<ArchiveVerdict, JudgeError> {
        self.judge(prompts::ARCHIVE_SYSTEM, &prompts::archive_input(user_text, reply, context))
            .await
    }

    async fn detect_patterns(&self, history: &str) -> Result<PatternReport, JudgeError> {
        self.judge(prompts::PATTERN_SYSTEM, &prompts::pattern_input(history))
            .await
    }

    async fn evaluate_response(
        &self,
        user_text: &str,
        reply: &str,
        persona: &str,
    ) -> Result<QualityVerdict, JudgeError> {
        let input = prompts::evaluation_input(user_text, reply, persona);
        self.judge(prompts::EVALUATION_SYSTEM, &input).await
    }
}

#[async_trait]
impl Summarizer for OllamaClient {
    async fn summarize_day(
        &self,
        date: NaiveDate,
        messages: &[ChatMessage],
    ) -> Result<String, JudgeError> {
        self.prose(prompts::SUMMARY_SYSTEM, &prompts::summary_input(date, messages))
            .await
    }

    async fn reflect(&self, context: &str) -> Result<String, JudgeError> {
        self.prose(prompts::REFLECTION_SYSTEM, context).await
    }
}

#[async_trait]
impl Responder for OllamaClient {
    async fn reply(&self, brief: &PersonaBrief, user_text: &str) -> Result<String> {
        let system = brief.render();
        let mut turns: Vec<(Role, &str)> = brief
            .history
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        turns.push((Role::User, user_text));

        let text = self
            .chat(&system, &turns, false, self.temperature, None)
            .await
            .context("Ollama chat request failed")?;
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("Ollama returned an empty reply");
        }
        Ok(text.to_string())
    }
}
