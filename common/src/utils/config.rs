use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Which embedding backend ingestion and retrieval call through the
/// `Embedder` trait.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    FastEmbed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAi
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    /// Brain this worker process claims ingestion tasks for. Each worker
    /// serves one brain, matching the per-brain database isolation in
    /// `BrainClientPool`; fan-out across brains is one process per brain.
    pub brain_id: String,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u32,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_task_lease_secs")]
    pub task_lease_secs: u64,
    #[serde(default = "default_adapter_retry_attempts")]
    pub adapter_retry_attempts: usize,
    #[serde(default = "default_adapter_retry_base_ms")]
    pub adapter_retry_base_ms: u64,
    #[serde(default = "default_adapter_retry_cap_ms")]
    pub adapter_retry_cap_ms: u64,
    #[serde(default = "default_agent_retry_attempts")]
    pub agent_retry_attempts: usize,

    #[serde(default = "default_consolidation_batch_size")]
    pub consolidation_batch_size: usize,
    #[serde(default = "default_neighborhood_similarity_threshold")]
    pub neighborhood_similarity_threshold: f32,
    #[serde(default = "default_duplicate_edge_similarity_threshold")]
    pub duplicate_edge_similarity_threshold: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_embedding_dimension() -> u32 {
    3072
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_task_lease_secs() -> u64 {
    300
}

fn default_adapter_retry_attempts() -> usize {
    5
}

fn default_adapter_retry_base_ms() -> u64 {
    2_000
}

fn default_adapter_retry_cap_ms() -> u64 {
    30_000
}

fn default_agent_retry_attempts() -> usize {
    3
}

fn default_consolidation_batch_size() -> usize {
    20
}

fn default_neighborhood_similarity_threshold() -> f32 {
    0.35
}

fn default_duplicate_edge_similarity_threshold() -> f32 {
    0.90
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: "test".into(),
            openai_base_url: default_base_url(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            brain_id: "test-brain".into(),
            embedding_backend: default_embedding_backend(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            worker_concurrency: default_worker_concurrency(),
            task_lease_secs: default_task_lease_secs(),
            adapter_retry_attempts: default_adapter_retry_attempts(),
            adapter_retry_base_ms: default_adapter_retry_base_ms(),
            adapter_retry_cap_ms: default_adapter_retry_cap_ms(),
            agent_retry_attempts: default_agent_retry_attempts(),
            consolidation_batch_size: default_consolidation_batch_size(),
            neighborhood_similarity_threshold: default_neighborhood_similarity_threshold(),
            duplicate_edge_similarity_threshold: default_duplicate_edge_similarity_threshold(),
        }
    }
}
