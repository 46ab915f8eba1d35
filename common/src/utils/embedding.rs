use async_openai::types::CreateEmbeddingRequestArgs;
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use std::sync::Mutex;
use tracing::debug;

use crate::error::BrainError;
use crate::storage::interfaces::Embedder;

/// Embeds via OpenAI's embeddings API, the default backend.
pub struct OpenAiEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: u32,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(client: async_openai::Client<async_openai::config::OpenAIConfig>, model: String, dimensions: u32) -> Self {
        Self { client, model, dimensions }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, BrainError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input([input])
            .build()
            .map_err(BrainError::OpenAi)?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .first()
            .ok_or_else(|| BrainError::Embedding("no embedding data received from OpenAI".into()))?
            .embedding
            .clone();

        debug!(dimensions = embedding.len(), "generated OpenAI embedding");
        Ok(embedding)
    }

    fn dimension(&self) -> u32 {
        self.dimensions
    }
}

/// Embeds locally via a bundled ONNX model (`fastembed`), the offline
/// fallback backend. `TextEmbedding` is not `Sync`-cheap to
/// call concurrently, so calls are serialized behind a mutex, mirroring how
/// the base crate's CPU-bound helpers are wrapped for shared access.
pub struct FastEmbedEmbedder {
    model: Mutex<TextEmbedding>,
    dimension: u32,
}

impl FastEmbedEmbedder {
    pub fn new(dimension: u32) -> Result<Self, BrainError> {
        let model = TextEmbedding::try_new(InitOptions::default())
            .map_err(|err| BrainError::Embedding(format!("failed to load fastembed model: {err}")))?;
        Ok(Self { model: Mutex::new(model), dimension })
    }
}

#[async_trait]
impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, BrainError> {
        let text = input.to_string();
        let dimension = self.dimension;
        let model = &self.model;

        tokio::task::block_in_place(|| {
            let mut model = model.lock().map_err(|_| BrainError::Embedding("fastembed model lock poisoned".into()))?;
            let mut embeddings = model
                .embed(vec![text], None)
                .map_err(|err| BrainError::Embedding(format!("fastembed inference failed: {err}")))?;
            embeddings
                .pop()
                .ok_or_else(|| BrainError::Embedding("fastembed returned no vectors".into()))
        })
        .map(|vector| {
            debug!(dimensions = vector.len(), target = dimension, "generated fastembed embedding");
            vector
        })
    }

    fn dimension(&self) -> u32 {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEmbedder(u32);

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, input: &str) -> Result<Vec<f32>, BrainError> {
            Ok(vec![input.len() as f32; self.0 as usize])
        }

        fn dimension(&self) -> u32 {
            self.0
        }
    }

    #[tokio::test]
    async fn embedder_trait_object_is_callable_through_dyn_dispatch() {
        let embedder: Box<dyn Embedder> = Box::new(StubEmbedder(8));
        let vector = embedder.embed("hello").await.expect("embed");
        assert_eq!(vector.len(), 8);
        assert_eq!(embedder.dimension(), 8);
    }
}
