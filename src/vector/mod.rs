use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::shared::models::TrainingDataType;

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;

/// Read filter applied to every search and bulk delete. Both fields are
/// mandatory: cross-database leakage is forbidden by contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub database_id: String,
    pub data_type: TrainingDataType,
}

impl SearchFilter {
    pub fn new(database_id: &str, data_type: TrainingDataType) -> Self {
        Self {
            database_id: database_id.to_string(),
            data_type,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct VectorStoreStats {
    pub total_points: usize,
    pub collection_name: String,
    pub dimension: usize,
}

/// Typed KNN store interface. Implementations guarantee stable score
/// ordering (higher is more similar) and no cross-filter leakage; the index
/// structure behind the contract is unspecified.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()>;

    async fn insert_batch(&self, points: Vec<(String, Vec<f32>, Value)>) -> Result<()> {
        for (id, vector, metadata) in points {
            self.insert(&id, vector, metadata).await?;
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    async fn delete_by_filter(&self, filter: &SearchFilter) -> Result<()>;

    async fn stats(&self) -> Result<VectorStoreStats>;
}
