use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Generator;
use crate::error::{ConfigError, GenerationServiceError};
use crate::gemini::{GeminiClient, GeminiConfig};

/// Generator backed by Gemini `generateContent`.
#[derive(Clone, Debug)]
pub struct GeminiGenerator {
    client: GeminiClient,
    endpoint: String,
    temperature: f32,
    max_output_tokens: usize,
}

impl GeminiGenerator {
    /// Builds a generator over a shared client.
    pub fn new(client: GeminiClient, config: &GeminiConfig) -> Result<Self, ConfigError> {
        if config.generation_model.trim().is_empty() {
            return Err(ConfigError::Invalid("missing Gemini generation model".into()));
        }
        let endpoint = client.model_url(&config.generation_model, "generateContent");
        Ok(Self {
            client,
            endpoint,
            temperature: 0.2,
            max_output_tokens: 64,
        })
    }

    /// Overrides sampling parameters.
    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationServiceError> {
        let body = GenerateRequest {
            contents: vec![GenerateContent {
                role: "user",
                parts: vec![TextPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };
        let resp = self.client.post(&self.endpoint, &body).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: GenerateResponse = resp.json().await?;
        parsed.text().ok_or(GenerationServiceError::EmptyResponse)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<GenerateContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerateContent<'a> {
    role: &'a str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let answer = self
            .candidates
            .into_iter()
            .find_map(|candidate| candidate.content)?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");
        (!answer.trim().is_empty()).then_some(answer)
    }
}
