//! Generative-AI collaborator seam.
//!
//! The core only depends on the `TextGenerator` capability: a prompt (and
//! optional response schema) eventually produces text, a stream of text
//! chunks, or fails. Retry and backoff live behind this trait, inside the
//! wrapper; callers observe success or a terminal error they must
//! tolerate.

pub mod provider;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Text chunks as they arrive; the sender half is dropped at end of
/// stream. Dropping the receiver abandons the generation without leaking
/// the producer task.
pub type ChunkReceiver = mpsc::Receiver<String>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generator not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single request/response generation, optionally constrained to a
    /// JSON schema.
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<String, LlmError>;

    /// Streaming generation; chunk boundaries carry no meaning.
    async fn generate_stream(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<ChunkReceiver, LlmError>;
}
