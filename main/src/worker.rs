use std::sync::Arc;

use common::storage::db::BrainClientPool;
use common::storage::interfaces::{Embedder, Llm};
use common::storage::services::BrainServices;
use common::utils::config::{get_config, EmbeddingBackend};
use common::utils::embedding::{FastEmbedEmbedder, OpenAiEmbedder};
use common::utils::llm::OpenAiLlm;
use ingestion_pipeline::{run_worker_loop, IngestionTuning};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let pool = BrainClientPool::new(
        config.surrealdb_address.clone(),
        config.surrealdb_username.clone(),
        config.surrealdb_password.clone(),
    );
    let db = pool.get(&config.brain_id).await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let llm: Arc<dyn Llm> = Arc::new(OpenAiLlm::new(openai_client.clone(), "gpt-4o".to_string()));
    let embedder: Arc<dyn Embedder> = match config.embedding_backend {
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(openai_client, config.embedding_model.clone(), config.embedding_dimension)),
        EmbeddingBackend::FastEmbed => Arc::new(FastEmbedEmbedder::new(config.embedding_dimension)?),
    };

    let services = Arc::new(BrainServices::new(db.clone(), llm, embedder));
    let tuning = IngestionTuning {
        agent_retry_attempts: config.agent_retry_attempts,
        duplicate_edge_threshold: config.duplicate_edge_similarity_threshold,
    };

    run_worker_loop(services, db, tuning).await?;
    Ok(())
}
