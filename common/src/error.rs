use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Unified error taxonomy for the ingestion core, spanning the store
/// adapters, agent layer, and task runtime. Every public fallible function
/// in this workspace resolves to one of these variants.
#[derive(Error, Debug)]
pub enum BrainError {
    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("openai error: {0}")]
    OpenAi(#[from] OpenAIError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("llm returned malformed output: {0}")]
    LlmParsing(String),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
    #[error("graph mapper error: {0}")]
    GraphMapper(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("embedding backend error: {0}")]
    Embedding(String),
    #[error("ingestion processing error: {0}")]
    Processing(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrainError {
    /// Transient transport failures are the only ones the adapter-level
    /// retry combinator should keep retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrainError::Database(_) | BrainError::OpenAi(_) | BrainError::Timeout(_)
        )
    }
}
