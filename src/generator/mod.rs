//! Prompt-to-text generation backends.

use async_trait::async_trait;

use crate::error::GenerationServiceError;

mod gemini;

pub use gemini::GeminiGenerator;

/// Produces a completion for a single-turn prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model's text reply.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationServiceError>;
}

/// Prompt used to estimate a recipe's per-serving cost.
pub fn cost_prompt(ingredients: &str) -> String {
    format!("Estimate cost per serving in USD for: {ingredients}")
}
