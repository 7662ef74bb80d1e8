use anyhow::Result;
use async_trait::async_trait;
use log::warn;

use crate::shared::config::EmbeddingConfig;

/// Vectorizer interface. The dimension is fixed per service instance and
/// every produced vector matches it; failures surface as errors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Client for an HTTP embedding endpoint, with a deterministic hash
/// fallback so development setups keep working without the service.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    fallback: HashEmbedder,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            fallback: HashEmbedder::new(config.dimension),
        }
    }

    async fn embed_remote(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "text": text,
            "model": self.model
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Embedding service error: {}",
                response.status()
            ));
        }

        let result: serde_json::Value = response.json().await?;
        let embedding: Vec<f32> = result["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response format"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if embedding.len() != self.dimension {
            return Err(anyhow::anyhow!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            ));
        }

        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.embed_remote(text).await {
            Ok(embedding) => Ok(embedding),
            Err(e) => {
                warn!("Remote embedding failed: {e}, falling back to hash embedding");
                self.fallback.embed(text).await
            }
        }
    }
}

/// Normalised bag-of-words hash embedding. Deterministic, cheap, and good
/// enough for development and tests; not a substitute for a trained model.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut embedding = vec![0.0f32; self.dimension];
        let words: Vec<&str> = text.split_whitespace().collect();

        for (i, chunk) in words.chunks(4).enumerate() {
            let mut hasher = DefaultHasher::new();
            chunk.join(" ").to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            for j in 0..64 {
                let idx = (i * 64 + j) % self.dimension;
                embedding[idx] += ((hash >> j) & 1) as f32;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed("show all users").await.unwrap();
        let b = embedder.embed("show all users").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn different_texts_embed_differently() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed("average sat score by city").await.unwrap();
        let b = embedder.embed("list invoices overdue last month").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[0], embedder.embed("one").await.unwrap());
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }
}
