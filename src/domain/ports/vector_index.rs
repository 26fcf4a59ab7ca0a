//! Opaque similarity-index capability port.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;

/// A scored search result from the vector index.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Capability interface over an external similarity store.
///
/// Callers degrade to keyword search when the index is unavailable.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or update a point.
    async fn upsert(&self, id: &str, vector: &[f32], payload: Value) -> DomainResult<()>;

    /// k-NN search by cosine similarity with an optional payload filter.
    async fn search(
        &self,
        vector: &[f32],
        filter: Option<Value>,
        k: usize,
    ) -> DomainResult<Vec<ScoredPoint>>;
}
