use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub database: DatabaseConfig,
    pub retrieval: RetrievalConfig,
    pub pruning: PruningConfig,
    pub decomposition: DecompositionConfig,
    pub refiner: RefinerConfig,
    pub training: TrainingConfig,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082".to_string(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            dimension: 1536,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection_name: String,
    pub dimension: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection_name: "sqlforge_training".to_string(),
            dimension: 1536,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Directory holding `{db_id}.sqlite` files for the development engine
    /// and `{db_id}.json` schema exports for the introspection fallback.
    pub data_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            data_path: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub similarity_threshold: f32,
    pub max_context_length: usize,
    pub max_examples_per_type: usize,
    pub enable_quality_filter: bool,
    pub enable_diversity_filter: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            max_context_length: 8000,
            max_examples_per_type: 3,
            enable_quality_filter: true,
            enable_diversity_filter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PruningConfig {
    pub token_limit: usize,
    pub avg_column_threshold: f64,
    pub total_column_threshold: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            token_limit: 25_000,
            avg_column_threshold: 6.0,
            total_column_threshold: 30,
        }
    }
}

/// Dataset profile the decomposer is tuned for. Bird-style questions lean on
/// business context and escalate borderline complexity; Spider-style lean on
/// SQL patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetProfile {
    Bird,
    Spider,
    Generic,
}

impl DatasetProfile {
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "bird" => Self::Bird,
            "spider" => Self::Spider,
            _ => Self::Generic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecompositionConfig {
    pub max_sub_questions: usize,
    pub profile: DatasetProfile,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_sub_questions: 5,
            profile: DatasetProfile::Generic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinerConfig {
    pub execution_timeout_seconds: u64,
    pub max_refinement_attempts: u32,
    pub enable_llm_validation: bool,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            execution_timeout_seconds: 120,
            max_refinement_attempts: 3,
            enable_llm_validation: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub auto_train_successful_queries: bool,
    /// A new QA pair is stored only when the closest existing pair scores
    /// below this similarity.
    pub novelty_threshold: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            auto_train_successful_queries: true,
            novelty_threshold: 0.95,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            database: DatabaseConfig::default(),
            retrieval: RetrievalConfig::default(),
            pruning: PruningConfig::default(),
            decomposition: DecompositionConfig::default(),
            refiner: RefinerConfig::default(),
            training: TrainingConfig::default(),
            max_retries: 3,
        }
    }
}

impl AppConfig {
    pub fn load() -> Self {
        dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = env::var("LLM_BASE_URL") {
            config.llm.base_url = v;
        }
        if let Ok(v) = env::var("LLM_API_KEY") {
            config.llm.api_key = v;
        }
        if let Ok(v) = env::var("LLM_MODEL") {
            config.llm.model = v;
        }
        if let Ok(v) = env::var("EMBEDDING_ENDPOINT") {
            config.embedding.endpoint = v;
        }
        if let Ok(v) = env::var("EMBEDDING_DIMENSION") {
            if let Ok(dim) = v.parse() {
                config.embedding.dimension = dim;
                config.vector_store.dimension = dim;
            }
        }
        if let Ok(v) = env::var("QDRANT_URL") {
            config.vector_store.url = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DATA_PATH") {
            config.database.data_path = v;
        }
        if let Ok(v) = env::var("DATASET_PROFILE") {
            config.decomposition.profile = DatasetProfile::parse(&v);
        }
        if let Ok(v) = env::var("MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                config.max_retries = n;
            }
        }

        config
    }
}
