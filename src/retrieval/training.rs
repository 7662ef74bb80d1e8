use anyhow::Result;
use chrono::Utc;
use log::{debug, info};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::EmbeddingService;
use crate::shared::config::TrainingConfig;
use crate::shared::models::TrainingDataType;
use crate::shared::utils::{extract_table_names_from_ddl, extract_table_names_from_sql};
use crate::vector::{SearchFilter, VectorStore};

#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QaPair {
    pub question: String,
    pub sql: String,
}

/// Ingest side of the retrieval corpus. Each write embeds the content,
/// assigns an id and persists `(id, vector, payload)`; the payload always
/// carries the `(db_id, data_type)` pair reads filter on.
pub struct TrainingService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingService>,
    config: TrainingConfig,
}

impl TrainingService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingService>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    async fn store_record(
        &self,
        data_type: TrainingDataType,
        database_id: &str,
        content: &str,
        mut payload: Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let embedding = self.embedder.embed(content).await?;

        let base = payload
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("payload must be an object"))?;
        base.insert("data_type".to_string(), json!(data_type.as_str()));
        base.insert("db_id".to_string(), json!(database_id));
        base.insert("content".to_string(), json!(content));
        base.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));

        self.store.insert(&id, embedding, payload).await?;
        debug!("Stored {} record {id} for {database_id}", data_type.as_str());
        Ok(id)
    }

    pub async fn train_ddl(&self, ddl_statements: Vec<String>, database_id: &str) -> Result<usize> {
        let mut stored = 0;
        for ddl in ddl_statements {
            let payload = json!({
                "source": "schema_discovery",
                "table_names": extract_table_names_from_ddl(&ddl),
            });
            self.store_record(TrainingDataType::Ddl, database_id, &ddl, payload)
                .await?;
            stored += 1;
        }
        Ok(stored)
    }

    pub async fn train_documentation(
        &self,
        documents: Vec<Document>,
        database_id: &str,
    ) -> Result<usize> {
        let mut stored = 0;
        for doc in documents {
            let payload = json!({
                "source": "documentation",
                "title": doc.title,
                "category": doc.category.unwrap_or_else(|| "general".to_string()),
            });
            self.store_record(
                TrainingDataType::Documentation,
                database_id,
                &doc.content,
                payload,
            )
            .await?;
            stored += 1;
        }
        Ok(stored)
    }

    pub async fn train_sql_examples(
        &self,
        sql_queries: Vec<String>,
        database_id: &str,
    ) -> Result<usize> {
        let mut stored = 0;
        for sql in sql_queries {
            let payload = json!({
                "source": "sql_examples",
                "sql": sql,
                "table_names": extract_table_names_from_sql(&sql),
            });
            self.store_record(TrainingDataType::SqlExample, database_id, &sql, payload)
                .await?;
            stored += 1;
        }
        Ok(stored)
    }

    pub async fn train_qa_pairs(&self, pairs: Vec<QaPair>, database_id: &str) -> Result<usize> {
        let mut stored = 0;
        for pair in pairs {
            let content = format!("Q: {}\nA: {}", pair.question, pair.sql);
            let payload = json!({
                "source": "qa_training",
                "question": pair.question,
                "sql": pair.sql,
                "table_names": extract_table_names_from_sql(&pair.sql),
            });
            self.store_record(TrainingDataType::QaPair, database_id, &content, payload)
                .await?;
            stored += 1;
        }
        Ok(stored)
    }

    pub async fn train_domain_knowledge(
        &self,
        knowledge_items: Vec<String>,
        database_id: &str,
    ) -> Result<usize> {
        let mut stored = 0;
        for item in knowledge_items {
            let payload = json!({"source": "domain_knowledge"});
            self.store_record(TrainingDataType::DomainKnowledge, database_id, &item, payload)
                .await?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Learn from a successful interaction. Gated on novelty: when an
    /// existing QA pair already matches the question closely the corpus is
    /// left alone, preventing near-duplicate degeneracy.
    pub async fn auto_train_from_successful_query(
        &self,
        question: &str,
        sql: &str,
        database_id: &str,
    ) -> Result<bool> {
        if !self.config.auto_train_successful_queries {
            return Ok(false);
        }

        let embedding = self.embedder.embed(question).await?;
        let filter = SearchFilter::new(database_id, TrainingDataType::QaPair);
        let existing = self.store.search(&embedding, &filter, 1).await?;

        if let Some(best) = existing.first() {
            if best.score >= self.config.novelty_threshold {
                debug!(
                    "Skipping auto-training, existing pair scores {:.3} for: {question}",
                    best.score
                );
                return Ok(false);
            }
        }

        self.train_qa_pairs(
            vec![QaPair {
                question: question.to_string(),
                sql: sql.to_string(),
            }],
            database_id,
        )
        .await?;
        info!("Auto-trained QA pair for {database_id}: {question}");
        Ok(true)
    }
}
