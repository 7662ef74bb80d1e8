use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;

use super::{ScoredPoint, SearchFilter, VectorStore, VectorStoreStats};
use crate::shared::config::VectorStoreConfig;

/// Qdrant REST adapter. Payload fields `db_id` and `data_type` carry the
/// mandatory read-filter pair.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection_name: String,
    dimension: usize,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.clone(),
            collection_name: config.collection_name.clone(),
            dimension: config.dimension,
        }
    }

    /// Create the collection when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);

        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            debug!("Using existing collection: {}", self.collection_name);
            return Ok(());
        }

        let create_request = serde_json::json!({
            "vectors": {
                "size": self.dimension,
                "distance": "Cosine"
            }
        });

        let response = self.client.put(&url).json(&create_request).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Qdrant collection create error: {error_text}"));
        }

        info!("Created collection: {}", self.collection_name);
        Ok(())
    }

    fn filter_condition(filter: &SearchFilter) -> Value {
        serde_json::json!({
            "must": [
                {"key": "db_id", "match": {"value": filter.database_id}},
                {"key": "data_type", "match": {"value": filter.data_type.as_str()}}
            ]
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn insert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        self.insert_batch(vec![(id.to_string(), vector, metadata)])
            .await
    }

    async fn insert_batch(&self, points: Vec<(String, Vec<f32>, Value)>) -> Result<()> {
        let count = points.len();
        let body = serde_json::json!({
            "points": points
                .into_iter()
                .map(|(id, vector, payload)| serde_json::json!({
                    "id": id,
                    "vector": vector,
                    "payload": payload
                }))
                .collect::<Vec<_>>()
        });

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points",
                self.base_url, self.collection_name
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Qdrant upsert error: {error_text}"));
        }

        debug!("Upserted {count} points into {}", self.collection_name);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let search_request = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "filter": Self::filter_condition(filter),
            "with_payload": true
        });

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.base_url, self.collection_name
            ))
            .json(&search_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Qdrant search error: {error_text}"));
        }

        let result: Value = response.json().await?;
        let points = result["result"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Qdrant response format"))?;

        let results = points
            .iter()
            .filter_map(|p| {
                let id = match &p["id"] {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let score = p["score"].as_f64()? as f32;
                Some(ScoredPoint {
                    id,
                    score,
                    metadata: p["payload"].clone(),
                })
            })
            .collect();

        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &SearchFilter) -> Result<()> {
        let delete_request = serde_json::json!({
            "filter": Self::filter_condition(filter)
        });

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/delete",
                self.base_url, self.collection_name
            ))
            .json(&delete_request)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                "Qdrant delete may have failed for {:?}: {}",
                filter,
                response.status()
            );
        }

        Ok(())
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let response = self
            .client
            .get(format!(
                "{}/collections/{}",
                self.base_url, self.collection_name
            ))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant collection info error: {}",
                response.status()
            ));
        }

        let result: Value = response.json().await?;
        let total_points = result["result"]["points_count"].as_u64().unwrap_or(0) as usize;

        Ok(VectorStoreStats {
            total_points,
            collection_name: self.collection_name.clone(),
            dimension: self.dimension,
        })
    }
}
