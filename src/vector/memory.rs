use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ScoredPoint, SearchFilter, VectorStore, VectorStoreStats};
use crate::shared::utils::cosine_similarity;

/// Exact cosine KNN over a process-local map. Used in development and as
/// the deterministic store for tests; inserts are idempotent per id.
pub struct InMemoryVectorStore {
    dimension: usize,
    points: Mutex<HashMap<String, (Vec<f32>, Value)>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: Mutex::new(HashMap::new()),
        }
    }

    fn matches(metadata: &Value, filter: &SearchFilter) -> bool {
        metadata["db_id"].as_str() == Some(filter.database_id.as_str())
            && metadata["data_type"].as_str() == Some(filter.data_type.as_str())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(anyhow::anyhow!(
                "Vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            ));
        }
        let mut points = self.points.lock().expect("vector store lock poisoned");
        points.insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let points = self.points.lock().expect("vector store lock poisoned");

        let mut results: Vec<ScoredPoint> = points
            .iter()
            .filter(|(_, (_, metadata))| Self::matches(metadata, filter))
            .map(|(id, (stored, metadata))| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_by_filter(&self, filter: &SearchFilter) -> Result<()> {
        let mut points = self.points.lock().expect("vector store lock poisoned");
        points.retain(|_, (_, metadata)| !Self::matches(metadata, filter));
        Ok(())
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        let points = self.points.lock().expect("vector store lock poisoned");
        Ok(VectorStoreStats {
            total_points: points.len(),
            collection_name: "in_memory".to_string(),
            dimension: self.dimension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::TrainingDataType;
    use serde_json::json;

    fn payload(db_id: &str, data_type: &str) -> Value {
        json!({"db_id": db_id, "data_type": data_type, "content": "x"})
    }

    #[tokio::test]
    async fn search_respects_filter() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert("a", vec![1.0, 0.0], payload("shop", "qa_pair"))
            .await
            .unwrap();
        store
            .insert("b", vec![1.0, 0.0], payload("other", "qa_pair"))
            .await
            .unwrap();
        store
            .insert("c", vec![1.0, 0.0], payload("shop", "ddl"))
            .await
            .unwrap();

        let filter = SearchFilter::new("shop", TrainingDataType::QaPair);
        let results = store.search(&[1.0, 0.0], &filter, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn results_are_score_ordered() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert("near", vec![1.0, 0.0], payload("db", "sql"))
            .await
            .unwrap();
        store
            .insert("far", vec![0.0, 1.0], payload("db", "sql"))
            .await
            .unwrap();

        let filter = SearchFilter::new("db", TrainingDataType::SqlExample);
        let results = store.search(&[1.0, 0.1], &filter, 10).await.unwrap();
        assert_eq!(results[0].id, "near");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_id() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert("a", vec![1.0, 0.0], payload("db", "ddl"))
            .await
            .unwrap();
        store
            .insert("a", vec![0.0, 1.0], payload("db", "ddl"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_points, 1);
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new(4);
        assert!(store
            .insert("a", vec![1.0], payload("db", "ddl"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_by_filter_scopes_to_pair() {
        let store = InMemoryVectorStore::new(2);
        store
            .insert("a", vec![1.0, 0.0], payload("db", "ddl"))
            .await
            .unwrap();
        store
            .insert("b", vec![1.0, 0.0], payload("db", "sql"))
            .await
            .unwrap();

        store
            .delete_by_filter(&SearchFilter::new("db", TrainingDataType::Ddl))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_points, 1);
    }
}
