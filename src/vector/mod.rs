//! Vector embedding and nearest-neighbour index collaborator.
//!
//! The index is optional. When `VECTOR_SEARCH_URL` is unset no index is
//! built and the vector duplicate signal reports itself disabled.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::constants::BOT_USER_AGENT;

/// A nearest-neighbour hit. `distance` is a similarity score: higher is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Embedding + approximate nearest-neighbour search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()>;

    /// Up to `k` neighbours, best first.
    async fn nearest(&self, vector: Vec<f32>, k: usize) -> Result<Vec<Neighbor>>;
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

/// JSON-over-HTTP vector index service.
#[derive(Clone)]
pub struct HttpVectorIndex {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpVectorIndex {
    /// Build the index client, or `None` when vector search is not configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(base_url) = config.vector_search_url.clone() else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(config.external_call_timeout)
            .user_agent(BOT_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Some(Self {
            http,
            base_url,
            api_key: config.vector_search_api_key.clone(),
        }))
    }

    async fn send(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Vector index request");

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to vector index")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            anyhow::bail!("Vector index {path} failed: {status} - {body}");
        }

        Ok(response)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.send(path, body)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse vector index {path} response"))
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response: EmbedResponse = self.post("/embed", json!({ "text": text })).await?;
        if response.embedding.is_empty() {
            anyhow::bail!("Vector index returned an empty embedding");
        }
        Ok(response.embedding)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.send("/upsert", json!({ "id": id, "embedding": vector }))
            .await?;
        Ok(())
    }

    async fn nearest(&self, vector: Vec<f32>, k: usize) -> Result<Vec<Neighbor>> {
        let response: NearestResponse = self
            .post("/nearest", json!({ "embedding": vector, "k": k }))
            .await?;
        Ok(response.neighbors)
    }
}

impl std::fmt::Debug for HttpVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVectorIndex")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
