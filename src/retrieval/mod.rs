//! Retrieval-augmented context assembly over the typed vector store.
//!
//! Every read is filtered by `(database_id, data_type)`; retrieved
//! candidates pass a quality filter (similarity threshold, content length,
//! SQL scaffolding noise) and a diversity filter (token-set Jaccard)
//! before entering the prompt.

use anyhow::Result;
use log::warn;
use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::shared::config::RetrievalConfig;
use crate::shared::models::TrainingDataType;
use crate::shared::utils::jaccard_similarity;
use crate::vector::{ScoredPoint, SearchFilter, VectorStore};

pub mod training;

pub use training::{Document, QaPair, TrainingService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    Balanced,
    QaFocused,
    SqlFocused,
    ContextFocused,
}

#[derive(Debug, Clone)]
pub struct RetrievedQaPair {
    pub question: String,
    pub sql: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub ddl: Vec<String>,
    pub documentation: Vec<String>,
    pub sql_examples: Vec<String>,
    pub qa_pairs: Vec<RetrievedQaPair>,
    pub domain_knowledge: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.ddl.is_empty()
            && self.documentation.is_empty()
            && self.sql_examples.is_empty()
            && self.qa_pairs.is_empty()
            && self.domain_knowledge.is_empty()
    }
}

/// SQL-typed content that is LLM scaffolding noise rather than a usable
/// example: unmatched code fences or error text captured as content.
pub fn has_sql_noise(content: &str) -> bool {
    if content.matches("```").count() % 2 == 1 {
        return true;
    }
    let lower = content.to_lowercase();
    ["syntax error", "invalid syntax", "missing from", "unknown column"]
        .iter()
        .any(|p| lower.contains(p))
        || (lower.contains("table") && lower.contains("doesn't exist"))
}

pub struct RagRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingService>,
    config: RetrievalConfig,
}

impl RagRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingService>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    fn type_budget(&self, strategy: RetrievalStrategy, data_type: TrainingDataType) -> usize {
        let base = self.config.max_examples_per_type;
        let half = (base / 2).max(1);
        match strategy {
            RetrievalStrategy::Balanced => base,
            RetrievalStrategy::QaFocused => match data_type {
                TrainingDataType::QaPair => base * 2,
                _ => half,
            },
            RetrievalStrategy::SqlFocused => match data_type {
                TrainingDataType::SqlExample => base * 2,
                _ => half,
            },
            RetrievalStrategy::ContextFocused => match data_type {
                TrainingDataType::Documentation
                | TrainingDataType::DomainKnowledge
                | TrainingDataType::Ddl => base * 2,
                TrainingDataType::SqlExample | TrainingDataType::QaPair => half,
            },
        }
    }

    pub async fn retrieve_context(
        &self,
        question: &str,
        database_id: &str,
        strategy: RetrievalStrategy,
    ) -> Result<RetrievedContext> {
        let embedding = self.embedder.embed(question).await?;

        let mut context = RetrievedContext::default();
        for data_type in TrainingDataType::ALL {
            let budget = self.type_budget(strategy, data_type);
            let filter = SearchFilter::new(database_id, data_type);

            // Fetch extra headroom so filtering still leaves a full budget.
            let raw = match self.store.search(&embedding, &filter, budget * 2).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Vector search failed for {}: {e}", data_type.as_str());
                    continue;
                }
            };

            let kept = self.filter_results(raw, data_type, budget);
            self.fill_context(&mut context, data_type, kept);
        }

        Ok(context)
    }

    fn filter_results(
        &self,
        raw: Vec<ScoredPoint>,
        data_type: TrainingDataType,
        budget: usize,
    ) -> Vec<ScoredPoint> {
        let mut kept: Vec<ScoredPoint> = Vec::new();

        for point in raw {
            if self.config.enable_quality_filter {
                if point.score < self.config.similarity_threshold {
                    continue;
                }
                let content = point.metadata["content"].as_str().unwrap_or("");
                let length = content.trim().len();
                if !(10..=2000).contains(&length) {
                    continue;
                }
                let sql_typed = matches!(
                    data_type,
                    TrainingDataType::SqlExample | TrainingDataType::QaPair
                );
                if sql_typed && has_sql_noise(content) {
                    continue;
                }
            }

            if self.config.enable_diversity_filter {
                let content = point.metadata["content"].as_str().unwrap_or("");
                let too_similar = kept.iter().any(|existing| {
                    let existing_content = existing.metadata["content"].as_str().unwrap_or("");
                    jaccard_similarity(
                        &content.to_lowercase(),
                        &existing_content.to_lowercase(),
                    ) >= 0.5
                });
                if too_similar {
                    continue;
                }
            }

            kept.push(point);
            if kept.len() >= budget {
                break;
            }
        }

        kept
    }

    fn fill_context(
        &self,
        context: &mut RetrievedContext,
        data_type: TrainingDataType,
        points: Vec<ScoredPoint>,
    ) {
        match data_type {
            TrainingDataType::Ddl => {
                context.ddl = points
                    .iter()
                    .filter_map(|p| p.metadata["content"].as_str().map(|s| s.to_string()))
                    .collect();
            }
            TrainingDataType::Documentation => {
                context.documentation = points
                    .iter()
                    .filter_map(|p| p.metadata["content"].as_str().map(|s| s.to_string()))
                    .collect();
            }
            TrainingDataType::SqlExample => {
                context.sql_examples = points
                    .iter()
                    .filter_map(|p| {
                        p.metadata["sql"]
                            .as_str()
                            .or_else(|| p.metadata["content"].as_str())
                            .map(|s| s.to_string())
                    })
                    .collect();
            }
            TrainingDataType::QaPair => {
                context.qa_pairs = points
                    .iter()
                    .filter_map(|p| {
                        let question = p.metadata["question"].as_str()?;
                        let sql = p.metadata["sql"].as_str()?;
                        if question.is_empty() || sql.is_empty() {
                            return None;
                        }
                        Some(RetrievedQaPair {
                            question: question.to_string(),
                            sql: sql.to_string(),
                            score: p.score,
                        })
                    })
                    .collect();
            }
            TrainingDataType::DomainKnowledge => {
                context.domain_knowledge = points
                    .iter()
                    .filter_map(|p| p.metadata["content"].as_str().map(|s| s.to_string()))
                    .collect();
            }
        }
    }

    /// Assemble the prompt context block: SQL examples, then high-quality
    /// QA pairs, then business documentation. When the block exceeds the
    /// configured length the lowest-priority section is truncated first.
    pub fn compose_context_block(&self, context: &RetrievedContext) -> String {
        let sql_section = Self::sql_section(&context.sql_examples);
        let qa_section = Self::qa_section(&context.qa_pairs);
        let doc_section = Self::doc_section(&context.documentation);

        let mut sections = vec![sql_section, qa_section, doc_section];
        let limit = self.config.max_context_length;

        // Drop from the tail (documentation first) until the block fits.
        loop {
            let total: usize = sections.iter().map(|s| s.len()).sum();
            if total <= limit {
                break;
            }
            match sections.iter().rposition(|s| !s.is_empty()) {
                Some(index) => sections[index].clear(),
                None => break,
            }
        }

        sections
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn sql_section(sql_examples: &[String]) -> String {
        if sql_examples.is_empty() {
            return String::new();
        }
        let mut parts = vec!["**Similar SQL Examples:**".to_string(), String::new()];
        for (i, sql) in sql_examples.iter().take(2).enumerate() {
            parts.push(format!("Example {}:", i + 1));
            parts.push("```sql".to_string());
            parts.push(sql.trim().to_string());
            parts.push("```".to_string());
            parts.push(String::new());
        }
        parts.join("\n")
    }

    fn qa_section(qa_pairs: &[RetrievedQaPair]) -> String {
        let high_quality: Vec<&RetrievedQaPair> =
            qa_pairs.iter().filter(|p| p.score >= 0.8).take(2).collect();
        if high_quality.is_empty() {
            return String::new();
        }
        let mut parts = vec!["**Similar Question-SQL Pairs:**".to_string(), String::new()];
        for (i, pair) in high_quality.iter().enumerate() {
            parts.push(format!("Q{}: {}", i + 1, pair.question));
            parts.push(format!("A{}:", i + 1));
            parts.push("```sql".to_string());
            parts.push(pair.sql.trim().to_string());
            parts.push("```".to_string());
            parts.push(String::new());
        }
        parts.join("\n")
    }

    fn doc_section(documentation: &[String]) -> String {
        if documentation.is_empty() {
            return String::new();
        }
        let mut parts = vec!["**Business Context:**".to_string(), String::new()];
        for (i, doc) in documentation.iter().take(2).enumerate() {
            parts.push(format!("Context {}:", i + 1));
            parts.push(doc.trim().to_string());
            parts.push(String::new());
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::vector::InMemoryVectorStore;
    use serde_json::json;

    const DIM: usize = 128;

    fn retriever(store: Arc<InMemoryVectorStore>) -> RagRetriever {
        RagRetriever::new(
            store,
            Arc::new(HashEmbedder::new(DIM)),
            RetrievalConfig {
                similarity_threshold: 0.0,
                ..Default::default()
            },
        )
    }

    async fn seed(
        store: &InMemoryVectorStore,
        id: &str,
        db_id: &str,
        data_type: &str,
        content: &str,
        question: Option<&str>,
        sql: Option<&str>,
    ) {
        let embedder = HashEmbedder::new(DIM);
        let vector = embedder.embed(content).await.unwrap();
        store
            .insert(
                id,
                vector,
                json!({
                    "db_id": db_id,
                    "data_type": data_type,
                    "content": content,
                    "question": question.unwrap_or(""),
                    "sql": sql.unwrap_or(""),
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retrieval_never_leaks_across_databases() {
        let store = Arc::new(InMemoryVectorStore::new(DIM));
        seed(
            &store,
            "a",
            "shop",
            "qa_pair",
            "Q: list users\nA: SELECT * FROM users",
            Some("list users"),
            Some("SELECT * FROM users"),
        )
        .await;
        seed(
            &store,
            "b",
            "warehouse",
            "qa_pair",
            "Q: list users\nA: SELECT * FROM wh_users",
            Some("list users"),
            Some("SELECT * FROM wh_users"),
        )
        .await;

        let retriever = retriever(store);
        let context = retriever
            .retrieve_context("list users", "shop", RetrievalStrategy::Balanced)
            .await
            .unwrap();

        assert_eq!(context.qa_pairs.len(), 1);
        assert_eq!(context.qa_pairs[0].sql, "SELECT * FROM users");
    }

    #[tokio::test]
    async fn quality_filter_drops_noise_and_short_content() {
        let store = Arc::new(InMemoryVectorStore::new(DIM));
        seed(&store, "short", "db", "sql", "x", None, Some("x")).await;
        seed(
            &store,
            "noisy",
            "db",
            "sql",
            "```sql\nSELECT broken -- syntax error near FROM clause here",
            None,
            Some("SELECT broken"),
        )
        .await;
        seed(
            &store,
            "good",
            "db",
            "sql",
            "SELECT name FROM products WHERE price > 10",
            None,
            Some("SELECT name FROM products WHERE price > 10"),
        )
        .await;

        let retriever = retriever(store);
        let context = retriever
            .retrieve_context(
                "product names above ten",
                "db",
                RetrievalStrategy::SqlFocused,
            )
            .await
            .unwrap();

        assert_eq!(context.sql_examples.len(), 1);
        assert!(context.sql_examples[0].contains("products"));
    }

    #[tokio::test]
    async fn diversity_filter_drops_near_duplicates() {
        let store = Arc::new(InMemoryVectorStore::new(DIM));
        seed(
            &store,
            "one",
            "db",
            "doc",
            "the orders table stores purchase orders per customer account",
            None,
            None,
        )
        .await;
        seed(
            &store,
            "two",
            "db",
            "doc",
            "the orders table stores purchase orders per customer region",
            None,
            None,
        )
        .await;
        seed(
            &store,
            "three",
            "db",
            "doc",
            "invoices are generated nightly by the billing service",
            None,
            None,
        )
        .await;

        let retriever = retriever(store);
        let context = retriever
            .retrieve_context("orders documentation", "db", RetrievalStrategy::Balanced)
            .await
            .unwrap();

        assert_eq!(context.documentation.len(), 2);
    }

    #[test]
    fn context_block_orders_sections_and_truncates() {
        let store = Arc::new(InMemoryVectorStore::new(DIM));
        let retriever = RagRetriever::new(
            store,
            Arc::new(HashEmbedder::new(DIM)),
            RetrievalConfig {
                max_context_length: 220,
                ..Default::default()
            },
        );

        let context = RetrievedContext {
            sql_examples: vec!["SELECT id FROM users".to_string()],
            qa_pairs: vec![RetrievedQaPair {
                question: "count users".to_string(),
                sql: "SELECT COUNT(*) FROM users".to_string(),
                score: 0.9,
            }],
            documentation: vec!["users holds one row per registered account".to_string(); 4],
            ..Default::default()
        };

        let block = retriever.compose_context_block(&context);
        let sql_pos = block.find("Similar SQL Examples").unwrap();
        let qa_pos = block.find("Question-SQL Pairs").unwrap();
        assert!(sql_pos < qa_pos);
        // Documentation is the lowest-priority section and was truncated away.
        assert!(!block.contains("Business Context"));
        assert!(block.len() <= 220);
    }

    #[test]
    fn low_score_qa_pairs_stay_out_of_the_block() {
        let store = Arc::new(InMemoryVectorStore::new(DIM));
        let retriever = retriever(store);
        let context = RetrievedContext {
            qa_pairs: vec![RetrievedQaPair {
                question: "q".to_string(),
                sql: "SELECT 1".to_string(),
                score: 0.5,
            }],
            ..Default::default()
        };
        assert!(retriever.compose_context_block(&context).is_empty());
    }

    #[test]
    fn sql_noise_detection() {
        assert!(has_sql_noise("```sql\nSELECT * FROM t"));
        assert!(has_sql_noise("ERROR: syntax error at or near"));
        assert!(has_sql_noise("table orders doesn't exist"));
        assert!(!has_sql_noise("SELECT * FROM orders WHERE total > 5"));
    }
}
