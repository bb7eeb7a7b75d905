//! Nearest-neighbor lookup over embedded indicator descriptions.
//!
//! The index is built once from the snapshot artifact and is read-only during
//! request handling; a rebuild produces a whole new index that is published
//! together with its snapshot. Lookup is brute-force cosine over the in-memory
//! matrix — the full cross-provider catalog is a few thousand rows, far below
//! the point where an ANN structure pays for itself.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::ProviderId;

/// One embedded indicator row from the offline index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedIndicator {
    pub provider: ProviderId,
    pub code: String,
    pub name: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub provider: ProviderId,
    pub code: String,
    pub name: String,
    /// Normalized to [0, 1] so downstream thresholds work directly.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    items: Vec<EmbeddedIndicator>,
}

impl SimilarityIndex {
    /// Build an index from artifact rows. Every vector must match the declared
    /// dimension; rows are L2-normalized once here so lookup is a plain dot
    /// product.
    pub fn build(dimension: usize, mut items: Vec<EmbeddedIndicator>) -> Result<Self> {
        if dimension == 0 {
            return Err(anyhow!("similarity index dimension must be > 0"));
        }
        for item in &mut items {
            if item.vector.len() != dimension {
                return Err(anyhow!(
                    "indicator {}/{} has dimension {} but index expects {}",
                    item.provider,
                    item.code,
                    item.vector.len(),
                    dimension
                ));
            }
            l2_normalize(&mut item.vector);
        }
        Ok(Self { dimension, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Top-K nearest indicators to the query vector, optionally restricted to
    /// one provider. Cosine in [-1, 1] is mapped to [0, 1].
    pub fn top_k(
        &self,
        query: &[f32],
        provider: Option<ProviderId>,
        k: usize,
    ) -> Result<Vec<SimilarityHit>> {
        if query.len() != self.dimension {
            return Err(anyhow!(
                "query vector dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            ));
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut hits: Vec<SimilarityHit> = self
            .items
            .iter()
            .filter(|item| provider.map_or(true, |p| item.provider == p))
            .map(|item| {
                let dot: f32 = item
                    .vector
                    .iter()
                    .zip(normalized.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                SimilarityHit {
                    provider: item.provider,
                    code: item.code.clone(),
                    name: item.name.clone(),
                    score: ((dot + 1.0) / 2.0).clamp(0.0, 1.0),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Query-time phrase embedding. The offline build job embeds the catalog; at
/// request time only the phrase itself goes through this.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build embedding HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            dimension,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": text,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Embedding request to {} failed", self.endpoint))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read embedding response body")?;
        if !status.is_success() {
            let preview: String = body.chars().take(200).collect();
            return Err(anyhow!("Embedding endpoint returned HTTP {}: {}", status, preview));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse embedding response (HTTP {})", status))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| anyhow!("Embedding response contained no rows"))?;
        if vector.len() != self.dimension {
            return Err(anyhow!(
                "Embedding dimension {} does not match configured {}",
                vector.len(),
                self.dimension
            ));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
