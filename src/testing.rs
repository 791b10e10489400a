//! Deterministic stand-ins for the external services.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedder::{Embedder, TaskType};
use crate::error::{EmbeddingServiceError, GenerationServiceError};
use crate::generator::Generator;

const KEYWORDS: &[&str] = &[
    "vegetarian",
    "protein",
    "tofu",
    "beef",
    "chicken",
    "lentil",
    "rice",
    "pasta",
];

/// Bag-of-keywords embedder: one dimension per keyword plus a bias term.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    failing_calls: HashSet<usize>,
    truncate_to: Option<usize>,
    seen: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            failing_calls: calls.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn truncating(len: usize) -> Self {
        Self {
            truncate_to: Some(len),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|keyword| lower.matches(keyword).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed(
        &self,
        texts: &[&str],
        _task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(EmbeddingServiceError::Unavailable(format!(
                "injected failure on call {call}"
            )));
        }
        self.seen
            .lock()
            .unwrap()
            .extend(texts.iter().map(|text| text.to_string()));
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = Self::vector(text);
                if let Some(len) = self.truncate_to {
                    vector.truncate(len);
                }
                vector
            })
            .collect())
    }
}

/// Generator answering with a canned reply, failing for prompts that mention
/// a configured marker.
#[derive(Debug)]
pub struct CannedGenerator {
    reply: String,
    fail_marker: Option<String>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_marker {
            Some(marker) if prompt.contains(marker.as_str()) => Err(
                GenerationServiceError::Unavailable("injected failure".into()),
            ),
            _ => Ok(self.reply.clone()),
        }
    }
}
