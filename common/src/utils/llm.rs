use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use tracing::debug;

use crate::domain::token_detail::TokenDetail;
use crate::error::BrainError;
use crate::storage::interfaces::Llm;

/// Chat-completion backed `Llm`, the only production implementation every
/// agent (Scout/Architect/Janitor) calls through.
pub struct OpenAiLlm {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiLlm {
    #[must_use]
    pub fn new(client: async_openai::Client<async_openai::config::OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl Llm for OpenAiLlm {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<(String, TokenDetail), BrainError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(BrainError::OpenAi)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_prompt)
                    .build()
                    .map_err(BrainError::OpenAi)?
                    .into(),
            ])
            .build()
            .map_err(BrainError::OpenAi)?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| BrainError::LlmParsing("chat completion returned no content".into()))?;

        let tokens = response
            .usage
            .map(|usage| TokenDetail::from_counts(u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens), 0, 0))
            .unwrap_or_else(TokenDetail::zero);

        debug!(model = %self.model, grand_total = tokens.grand_total, "chat completion returned");
        Ok((content, tokens))
    }
}
