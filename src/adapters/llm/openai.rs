//! OpenAI-compatible LLM client.
//!
//! Chat completions with JSON-object responses back every analysis call;
//! the embeddings endpoint backs deduplication and search. Calls are rate
//! limited with a token bucket and retried with exponential backoff.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::LlmConfig;
use crate::domain::ports::{
    CoherenceAnalysis, CoherenceRequest, EnrichTaskRequest, EnrichedTask, LlmClient,
    TrajectoryAnalysis, TrajectoryRequest,
};

/// Truncate long inputs before embedding; mirrors provider token limits.
const MAX_EMBED_CHARS: usize = 30_000;

pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
    api_key: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> DomainResult<Self> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| DomainError::LlmError("No API key configured".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::LlmError(format!("HTTP client build failed: {e}")))?;

        let rps = NonZeroU32::new(config.requests_per_second.max(1))
            .ok_or_else(|| DomainError::LlmError("Invalid requests_per_second".to_string()))?;
        let burst = NonZeroU32::new(config.burst_size.max(1))
            .ok_or_else(|| DomainError::LlmError("Invalid burst_size".to_string()))?;
        let limiter = RateLimiter::direct(Quota::per_second(rps).allow_burst(burst));

        Ok(Self { client, config, api_key, limiter })
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.timeout_secs * u64::from(self.config.max_retries.max(1)),
            )))
            .build()
    }

    async fn post_json(&self, path: &str, body: Value) -> DomainResult<Value> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let operation = || async {
            self.limiter.until_ready().await;
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(DomainError::LlmError(e.to_string())))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(DomainError::LlmError(e.to_string())))?;

            if status.is_success() {
                serde_json::from_str(&text).map_err(|e| {
                    backoff::Error::permanent(DomainError::LlmError(format!(
                        "Invalid JSON response: {e}"
                    )))
                })
            } else if status.as_u16() == 429 || status.is_server_error() {
                Err(backoff::Error::transient(DomainError::LlmError(format!(
                    "API error {status}: {text}"
                ))))
            } else {
                Err(backoff::Error::permanent(DomainError::LlmError(format!(
                    "API error {status}: {text}"
                ))))
            }
        };

        backoff::future::retry(self.backoff(), operation).await
    }

    /// Run a chat completion that must answer with a single JSON object.
    async fn chat_json<T: serde::de::DeserializeOwned>(
        &self,
        system: &str,
        user: Value,
    ) -> DomainResult<T> {
        let body = json!({
            "model": self.config.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user.to_string()},
            ],
        });

        let response = self.post_json("/chat/completions", body).await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| DomainError::LlmError("Missing completion content".to_string()))?;

        serde_json::from_str(content)
            .map_err(|e| DomainError::LlmError(format!("Completion is not the expected JSON: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

const ENRICH_SYSTEM_PROMPT: &str = "You enrich task descriptions for autonomous coding agents. \
Given a raw task, its done definition, and context, answer with a JSON object: \
{\"enriched_description\": string, \"estimated_complexity\": integer 1-10}. \
The enriched description must be self-contained and actionable.";

const TRAJECTORY_SYSTEM_PROMPT: &str = "You are a trajectory monitor for an autonomous coding agent. \
Judge whether the agent's recent terminal output stays aligned with its accumulated goal and \
constraints. Answer with a JSON object: {\"current_phase\": string, \"trajectory_aligned\": bool, \
\"alignment_score\": number 0-1, \"alignment_issues\": [string], \"needs_steering\": bool, \
\"steering_type\": one of stuck|drifting|violating_constraints|over_engineering|confused|off_track or null, \
\"steering_recommendation\": string or null, \"trajectory_summary\": string, \
\"last_claude_message_marker\": string or null, \"current_focus\": string or null}.";

const COHERENCE_SYSTEM_PROMPT: &str = "You are a system conductor overseeing a fleet of coding agents. \
Given per-agent trajectory summaries, detect duplicated work and coherence problems. Answer with a \
JSON object: {\"coherence_score\": number 0-1, \"duplicates\": [{\"agent1\": string, \"agent2\": string, \
\"similarity\": number, \"work\": string}], \"alignment_issues\": [string], \
\"termination_recommendations\": [{\"agent_id\": string, \"reason\": string}], \
\"coordination_needs\": [{\"agents\": [string], \"resource\": string, \"action\": string}], \
\"system_summary\": string}.";

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        let truncated = if text.len() > MAX_EMBED_CHARS {
            tracing::warn!(
                original_len = text.len(),
                "Text truncated to {MAX_EMBED_CHARS} chars for embedding"
            );
            &text[..MAX_EMBED_CHARS]
        } else {
            text
        };

        let body = serde_json::to_value(EmbeddingsRequest {
            model: &self.config.embedding_model,
            input: truncated,
            encoding_format: "float",
        })?;

        let response = self.post_json("/embeddings", body).await?;
        let parsed: EmbeddingsResponse = serde_json::from_value(response)
            .map_err(|e| DomainError::LlmError(format!("Invalid embeddings response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| DomainError::LlmError("Empty embeddings response".to_string()))
    }

    async fn enrich_task(&self, request: EnrichTaskRequest) -> DomainResult<EnrichedTask> {
        self.chat_json(ENRICH_SYSTEM_PROMPT, serde_json::to_value(&request)?)
            .await
    }

    async fn analyze_agent_trajectory(
        &self,
        request: TrajectoryRequest,
    ) -> DomainResult<TrajectoryAnalysis> {
        self.chat_json(TRAJECTORY_SYSTEM_PROMPT, serde_json::to_value(&request)?)
            .await
    }

    async fn analyze_system_coherence(
        &self,
        request: CoherenceRequest,
    ) -> DomainResult<CoherenceAnalysis> {
        self.chat_json(COHERENCE_SYSTEM_PROMPT, serde_json::to_value(&request)?)
            .await
    }
}
