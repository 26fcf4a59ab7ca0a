//! Embedding generation and cosine similarity.
//!
//! Cosine math is pure and synchronous; generation goes through the LLM
//! client. Zero-norm inputs yield 0 and results are clipped to [-1, 1].

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::ports::LlmClient;

/// Cosine similarity of two vectors, clipped to [-1, 1].
///
/// Mismatched dimensions and zero-norm inputs yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        if a.len() != b.len() && !a.is_empty() && !b.is_empty() {
            tracing::warn!(len_a = a.len(), len_b = b.len(), "Vector dimension mismatch");
        }
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    similarity.clamp(-1.0, 1.0) as f32
}

/// Cosine similarity of one query against many embeddings.
pub fn batch_similarities(query: &[f32], embeddings: &[Vec<f32>]) -> Vec<f32> {
    embeddings
        .iter()
        .map(|e| cosine_similarity(query, e))
        .collect()
}

/// Embedding generation over the LLM provider.
pub struct EmbeddingService {
    llm: Arc<dyn LlmClient>,
}

impl EmbeddingService {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Embed one text.
    pub async fn generate(&self, text: &str) -> DomainResult<Vec<f32>> {
        self.llm.embed(text).await
    }

    /// Weighted ticket embedding: title counted twice, tags ~1.5×,
    /// description once. Concatenated before a single embed call.
    pub async fn generate_ticket_embedding(
        &self,
        title: &str,
        description: &str,
        tags: &[String],
    ) -> DomainResult<Vec<f32>> {
        let tag_text = tags.join(" ");
        let weighted = format!("{title} {title} {description} {tag_text} {tag_text}");
        self.generate(&weighted).await
    }
}
