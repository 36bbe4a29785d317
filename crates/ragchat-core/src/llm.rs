//! Language model trait.
//!
//! The retrieval pipeline composes a single prompt per chat turn and hands
//! it to a [`LanguageModel`]. The OpenAI-compatible implementation lives in
//! the `ragchat` app crate.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier reported by the backend.
    fn model_name(&self) -> &str;

    /// Complete a fully composed prompt, returning the answer text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
