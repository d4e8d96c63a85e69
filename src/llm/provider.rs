//! OpenAI-compatible HTTP implementation of `TextGenerator`.
//!
//! Bounded retries with jittered exponential backoff on rate limits and
//! server errors; SSE chunk parsing for the streaming path. The model
//! behind the endpoint stays a black box.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::warn;

use super::{ChunkReceiver, LlmError, TextGenerator};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const MAX_RETRIES: usize = 3;
const BASE_BACKOFF_MS: u64 = 200;
const BACKOFF_JITTER_RATIO: f64 = 0.2;
const CHUNK_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct HttpTextGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

impl HttpTextGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        let api_key = env_string("LLM_API_KEY");
        let model = env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_endpoint = normalize_endpoint(
            env_string("LLM_API_ENDPOINT")
                .or_else(|| env_string("LLM_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );
        let timeout = Duration::from_millis(env_u64("LLM_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS));

        Self::new(GeneratorConfig {
            api_key,
            model,
            api_endpoint,
            timeout,
        })
    }

    pub fn is_available(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|v| !v.trim().is_empty())
            && !self.config.model.trim().is_empty()
            && !self.config.api_endpoint.trim().is_empty()
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.config
            .api_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LlmError::NotConfigured("LLM_API_KEY"))
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_endpoint.trim_end_matches('/')
        )
    }

    fn payload(&self, prompt: &str, schema: Option<&serde_json::Value>, stream: bool) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });
        if let Some(schema) = schema {
            payload["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": schema},
            });
        }
        payload
    }

    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for retry in 0..=MAX_RETRIES {
            match self
                .client
                .post(url)
                .bearer_auth(api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = LlmError::HttpStatus { status, body };
                    if retry < MAX_RETRIES && is_retryable(status) {
                        warn!(retry, ?status, "generation request failed, retrying");
                        sleep(backoff_delay(retry)).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = LlmError::Request(e);
                    if retry < MAX_RETRIES {
                        warn!(retry, "generation request error, retrying");
                        sleep(backoff_delay(retry)).await;
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_error.unwrap_or(LlmError::NotConfigured("unknown")))
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key()?.to_string();
        let payload = self.payload(prompt, schema, false);
        let resp = self
            .post_with_retry(&self.chat_url(), &api_key, &payload)
            .await?;

        let bytes = resp.bytes().await?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(error = %e, "failed to parse generation response body");
            LlmError::Json(e)
        })?;
        parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or(LlmError::EmptyResponse)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<ChunkReceiver, LlmError> {
        let api_key = self.api_key()?.to_string();
        let payload = self.payload(prompt, schema, true);
        let resp = self
            .post_with_retry(&self.chat_url(), &api_key, &payload)
            .await?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            let mut line_buffer = String::new();

            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(error = %err, "generation stream aborted mid-body");
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    let Some(content) = parse_sse_line(line.trim()) else {
                        continue;
                    };
                    if tx.send(content).await.is_err() {
                        // Receiver dropped: the caller abandoned the
                        // stream, stop pulling from the network.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    chunk.choices.into_iter().next()?.delta.content
}

fn backoff_delay(retry: usize) -> Duration {
    let base_ms = (BASE_BACKOFF_MS << retry) as f64;
    let mut rng = rand::rng();
    let factor = rng.random_range(1.0 - BACKOFF_JITTER_RATIO..=1.0 + BACKOFF_JITTER_RATIO);
    Duration::from_millis((base_ms * factor).round().max(1.0) as u64)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
