//! Qdrant-backed vector index.
//!
//! Thin HTTP adapter over the points API. Callers treat any failure as
//! "index unavailable" and degrade to keyword search.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{ScoredPoint, VectorIndex};

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DomainError::VectorIndexUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            collection: collection.into(),
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.base_url.trim_end_matches('/'),
            self.collection,
            suffix
        )
    }

    /// Create the collection when missing. Safe to call repeatedly.
    pub async fn ensure_collection(&self, dimension: usize) -> DomainResult<()> {
        let response = self
            .client
            .put(self.url(""))
            .json(&json!({"vectors": {"size": dimension, "distance": "Cosine"}}))
            .send()
            .await
            .map_err(|e| DomainError::VectorIndexUnavailable(e.to_string()))?;

        // 409 means the collection already exists.
        if !response.status().is_success() && response.status().as_u16() != 409 {
            return Err(DomainError::VectorIndexUnavailable(format!(
                "collection create failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, id: &str, vector: &[f32], payload: Value) -> DomainResult<()> {
        let body = json!({
            "points": [{"id": id, "vector": vector, "payload": payload}]
        });

        let response = self
            .client
            .put(self.url("/points?wait=true"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::VectorIndexUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::VectorIndexUnavailable(format!(
                "upsert failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<Value>,
        k: usize,
    ) -> DomainResult<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::VectorIndexUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::VectorIndexUnavailable(format!(
                "search failed: {}",
                response.status()
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| DomainError::VectorIndexUnavailable(e.to_string()))?;

        let hits = parsed["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|hit| ScoredPoint {
                id: hit["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| hit["id"].to_string()),
                score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                payload: hit["payload"].clone(),
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_parses_hits() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/collections/test/points/search")
            .with_status(200)
            .with_body(
                r#"{"result": [{"id": "t1", "score": 0.92, "payload": {"kind": "ticket"}}]}"#,
            )
            .create_async()
            .await;

        let index = QdrantIndex::new(server.url(), "test").unwrap();
        let hits = index.search(&[0.1, 0.2], None, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t1");
        assert!((hits[0].score - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unreachable_index_is_unavailable() {
        let index = QdrantIndex::new("http://127.0.0.1:1", "test").unwrap();
        let err = index.search(&[0.1], None, 5).await.unwrap_err();
        assert!(matches!(err, DomainError::VectorIndexUnavailable(_)));
    }
}
