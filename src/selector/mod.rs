//! Schema Selector: introspects the target database, decides whether the
//! schema needs pruning and scopes the description to what the question
//! plausibly needs.

use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::llm::{extract_json_object, LlmProvider};
use crate::prompts::PromptRegistry;
use crate::shared::config::PruningConfig;
use crate::shared::models::{AgentOutcome, ColumnSelection, Message};
use crate::shared::utils::estimate_token_count;

pub mod catalog;
pub mod pruning;

pub use catalog::{render_schema, CatalogEntry, SchemaCatalog};

#[derive(Debug, Default, Clone, Serialize)]
pub struct SelectorStats {
    pub total_queries: u64,
    pub pruned_queries: u64,
    pub avg_reduction_ratio: f64,
}

pub struct SelectorAgent {
    catalog: SchemaCatalog,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptRegistry>,
    config: PruningConfig,
    stats: Mutex<SelectorStats>,
}

impl SelectorAgent {
    pub fn new(
        catalog: SchemaCatalog,
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        config: PruningConfig,
    ) -> Self {
        Self {
            catalog,
            llm,
            prompts,
            config,
            stats: Mutex::new(SelectorStats::default()),
        }
    }

    pub async fn process(&self, message: &mut Message) -> AgentOutcome {
        let entry = match self.catalog.get_or_load(&message.database_id).await {
            Ok(entry) => entry,
            Err(e) => return AgentOutcome::fail(e.to_string()),
        };

        let (full_desc, full_fk) = render_schema(&entry.info, None);
        let full_tokens = estimate_token_count(&full_desc);

        let mut reduction_ratio = 0.0;
        if pruning::needs_pruning(&entry.stats, &full_desc, &self.config) {
            match self
                .prune_with_llm(message, &full_desc, &full_fk)
                .await
            {
                Some(mut decisions) => {
                    pruning::enforce_key_constraints(&mut decisions, &entry.info);
                    if pruning::selection_restricts(&decisions, &entry.info) {
                        let (desc, fk) = render_schema(&entry.info, Some(&decisions));
                        let pruned_tokens = estimate_token_count(&desc);
                        if full_tokens > 0 {
                            reduction_ratio = 1.0 - pruned_tokens as f64 / full_tokens as f64;
                        }

                        message.schema_description = desc;
                        message.foreign_key_description = fk;
                        message.extracted_schema = decisions;
                        message.was_pruned = true;
                        info!(
                            "Schema pruned for {} ({:.0}% reduction)",
                            message.database_id,
                            reduction_ratio * 100.0
                        );
                    } else {
                        self.keep_full_schema(message, &entry.info, full_desc.clone(), full_fk.clone());
                    }
                }
                None => {
                    // Pruning fallback: proceed with the complete schema.
                    warn!(
                        "Schema pruning fell back to full schema for {}",
                        message.database_id
                    );
                    self.keep_full_schema(message, &entry.info, full_desc.clone(), full_fk.clone());
                }
            }
        } else {
            self.keep_full_schema(message, &entry.info, full_desc, full_fk);
        }

        message.send_to = "Decomposer".to_string();

        {
            let mut stats = self.stats.lock().expect("selector stats lock poisoned");
            let pruned_before = stats.pruned_queries as f64;
            stats.total_queries += 1;
            if message.was_pruned {
                stats.pruned_queries += 1;
                stats.avg_reduction_ratio = (stats.avg_reduction_ratio * pruned_before
                    + reduction_ratio)
                    / stats.pruned_queries as f64;
            }
        }

        AgentOutcome::ok_with(json!({
            "pruned": message.was_pruned,
            "table_count": entry.stats.table_count,
            "column_count": entry.stats.total_column_count,
        }))
    }

    fn keep_full_schema(
        &self,
        message: &mut Message,
        info: &crate::shared::models::DatabaseInfo,
        desc: String,
        fk: String,
    ) {
        message.schema_description = desc;
        message.foreign_key_description = fk;
        message.extracted_schema = info
            .tables
            .iter()
            .map(|t| (t.clone(), ColumnSelection::All))
            .collect();
        message.was_pruned = false;
    }

    async fn prune_with_llm(
        &self,
        message: &Message,
        schema_info: &str,
        fk_info: &str,
    ) -> Option<HashMap<String, ColumnSelection>> {
        let mut params = HashMap::new();
        params.insert("question", message.question.clone());
        params.insert("schema_info", schema_info.to_string());
        params.insert("fk_info", fk_info.to_string());
        params.insert("evidence", message.evidence.clone());

        let (system, user) = match self.prompts.format("selector", "schema_pruning", &params) {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!("Pruning prompt unavailable: {e}");
                return None;
            }
        };

        let response = self.llm.generate(&system, &user, 0.1, 1500).await;
        if !response.success {
            warn!(
                "Pruning LLM call failed: {}",
                response.error.as_deref().unwrap_or("unknown")
            );
            return None;
        }

        extract_json_object(&response.content)
            .and_then(|json| pruning::parse_pruning_response(&json))
    }

    pub async fn invalidate(&self, database_id: &str) {
        self.catalog.invalidate(database_id).await;
    }

    pub fn stats(&self) -> SelectorStats {
        self.stats
            .lock()
            .expect("selector stats lock poisoned")
            .clone()
    }
}
