//! Error taxonomy for the Solace chat path.
//!
//! `ChatError` is the only error a caller of the pipeline ever sees. Generation and
//! logging faults have their own types so the pipeline can degrade instead of failing.

use thiserror::Error;

/// Errors surfaced to the chat caller.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Message was empty or whitespace only (HTTP 400).
    #[error("Empty message")]
    EmptyInput,
    /// Anything else that prevented a reply (HTTP 500). Detail is for operators only.
    #[error("internal failure: {0}")]
    Internal(String),
}

/// External text-generation call failed. Recovered by the pipeline with a default reply.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured (set PAGI_LLM_API_KEY or OPENROUTER_API_KEY)")]
    MissingApiKey,
    #[error("generation request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generation API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation response parse: {0}")]
    Parse(String),
    #[error("generator returned no content")]
    Empty,
}

/// Interaction log failures. Suppressed on the chat path, surfaced by export.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("interaction log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("interaction log encode: {0}")]
    Json(#[from] serde_json::Error),
    #[error("interaction log export: {0}")]
    Csv(#[from] csv::Error),
    #[error("interaction log lock poisoned")]
    Poisoned,
}
