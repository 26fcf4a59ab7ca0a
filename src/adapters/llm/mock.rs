//! Scripted LLM client for tests and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{
    CoherenceAnalysis, CoherenceRequest, EnrichTaskRequest, EnrichedTask, LlmClient,
    TrajectoryAnalysis, TrajectoryRequest,
};

/// LLM client returning pre-scripted responses.
///
/// Embeddings are deterministic word-presence vectors so that similar texts
/// embed close to each other without any provider.
#[derive(Default)]
pub struct MockLlmClient {
    trajectory_responses: Mutex<VecDeque<TrajectoryAnalysis>>,
    coherence_responses: Mutex<VecDeque<CoherenceAnalysis>>,
    enrich_responses: Mutex<VecDeque<EnrichedTask>>,
    pub fail_embeddings: Mutex<bool>,
    pub fail_enrichment: Mutex<bool>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_trajectory(&self, analysis: TrajectoryAnalysis) {
        self.trajectory_responses.lock().unwrap().push_back(analysis);
    }

    pub fn push_coherence(&self, analysis: CoherenceAnalysis) {
        self.coherence_responses.lock().unwrap().push_back(analysis);
    }

    pub fn push_enrichment(&self, enriched: EnrichedTask) {
        self.enrich_responses.lock().unwrap().push_back(enriched);
    }

    pub fn set_fail_embeddings(&self, fail: bool) {
        *self.fail_embeddings.lock().unwrap() = fail;
    }

    pub fn set_fail_enrichment(&self, fail: bool) {
        *self.fail_enrichment.lock().unwrap() = fail;
    }

    /// Deterministic bag-of-words embedding over a small fixed vocabulary
    /// hash space. Equal texts map to equal vectors.
    fn hash_embed(text: &str) -> Vec<f32> {
        const DIM: usize = 64;
        let mut vector = vec![0.0f32; DIM];
        for word in text.to_lowercase().split_whitespace() {
            let mut h: usize = 5381;
            for b in word.bytes() {
                h = h.wrapping_mul(33).wrapping_add(b as usize);
            }
            vector[h % DIM] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        if *self.fail_embeddings.lock().unwrap() {
            return Err(DomainError::LlmError("scripted embedding failure".to_string()));
        }
        Ok(Self::hash_embed(text))
    }

    async fn enrich_task(&self, request: EnrichTaskRequest) -> DomainResult<EnrichedTask> {
        if *self.fail_enrichment.lock().unwrap() {
            return Err(DomainError::LlmError("scripted enrichment failure".to_string()));
        }
        if let Some(scripted) = self.enrich_responses.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(EnrichedTask {
            enriched_description: format!(
                "{} (done when: {})",
                request.task_description, request.done_definition
            ),
            estimated_complexity: 5,
        })
    }

    async fn analyze_agent_trajectory(
        &self,
        _request: TrajectoryRequest,
    ) -> DomainResult<TrajectoryAnalysis> {
        if let Some(scripted) = self.trajectory_responses.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(TrajectoryAnalysis::default_healthy())
    }

    async fn analyze_system_coherence(
        &self,
        _request: CoherenceRequest,
    ) -> DomainResult<CoherenceAnalysis> {
        if let Some(scripted) = self.coherence_responses.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(CoherenceAnalysis::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_equal_texts_embed_equal() {
        let llm = MockLlmClient::new();
        let a = llm.embed("implement jwt login").await.unwrap();
        let b = llm.embed("implement jwt login").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_scripted_responses_fifo() {
        let llm = MockLlmClient::new();
        llm.push_enrichment(EnrichedTask {
            enriched_description: "first".to_string(),
            estimated_complexity: 1,
        });
        llm.push_enrichment(EnrichedTask {
            enriched_description: "second".to_string(),
            estimated_complexity: 2,
        });

        let req = EnrichTaskRequest {
            task_description: "x".to_string(),
            done_definition: "y".to_string(),
            context: vec![],
            phase_context: None,
        };
        assert_eq!(llm.enrich_task(req.clone()).await.unwrap().enriched_description, "first");
        assert_eq!(llm.enrich_task(req).await.unwrap().enriched_description, "second");
    }
}
