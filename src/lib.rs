pub mod decomposer;
pub mod embedding;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod prompts;
pub mod refiner;
pub mod retrieval;
pub mod selector;
pub mod shared;
pub mod vector;
pub mod workflow;

use std::sync::Arc;

use crate::decomposer::DecomposerAgent;
use crate::embedding::{EmbeddingService, HttpEmbeddingClient};
use crate::executor::{PostgresExecutor, QueryExecutor, SqliteExecutor};
use crate::llm::OpenAiClient;
use crate::prompts::PromptRegistry;
use crate::refiner::RefinerAgent;
use crate::retrieval::{RagRetriever, TrainingService};
use crate::selector::{SchemaCatalog, SelectorAgent};
use crate::shared::config::AppConfig;
use crate::vector::{QdrantStore, VectorStore};
use crate::workflow::{InMemoryHistoryStore, Orchestrator};

/// Wire the full pipeline from configuration: real LLM, embedding, Qdrant
/// and database adapters. The primary engine is Postgres when a database
/// URL is configured, the file-based SQLite engine otherwise.
pub fn build_orchestrator(config: &AppConfig) -> Orchestrator {
    let llm: Arc<dyn llm::LlmProvider> = Arc::new(OpenAiClient::new(&config.llm));
    let embedder: Arc<dyn EmbeddingService> = Arc::new(HttpEmbeddingClient::new(&config.embedding));
    let vector_store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(&config.vector_store));
    let prompts = Arc::new(PromptRegistry::default());

    let executor: Arc<dyn QueryExecutor> = if config.database.url.is_empty() {
        Arc::new(SqliteExecutor::new(&config.database.data_path))
    } else {
        Arc::new(PostgresExecutor::new(&config.database))
    };

    let retriever = Arc::new(RagRetriever::new(
        vector_store.clone(),
        embedder.clone(),
        config.retrieval.clone(),
    ));
    let training = Arc::new(TrainingService::new(
        vector_store.clone(),
        embedder,
        config.training.clone(),
    ));

    let selector = SelectorAgent::new(
        SchemaCatalog::new(executor.clone(), &config.database.data_path),
        llm.clone(),
        prompts.clone(),
        config.pruning.clone(),
    );
    let decomposer = DecomposerAgent::new(
        llm.clone(),
        prompts.clone(),
        Some(retriever),
        config.decomposition.clone(),
    );
    let refiner = RefinerAgent::new(llm, prompts.clone(), executor, config.refiner.clone());

    Orchestrator::new(
        selector,
        decomposer,
        refiner,
        Arc::new(InMemoryHistoryStore::new()),
        Some(training),
        Some(vector_store),
        prompts,
        config.max_retries,
    )
}
