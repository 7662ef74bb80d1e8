//! Execution Refiner: blocks unsafe SQL, executes under a hard timeout and
//! attempts LLM-driven repair when the engine rejects the query.

use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::{classify_sql_error, is_repairable};
use crate::executor::QueryExecutor;
use crate::llm::{extract_json_object, extract_sql, LlmProvider};
use crate::prompts::PromptRegistry;
use crate::shared::config::RefinerConfig;
use crate::shared::models::{AgentOutcome, Message, SqlExecutionResult};

pub mod security;

pub use security::SqlSecurityValidator;

#[derive(Debug, Default, Clone, Serialize)]
pub struct RefinerStats {
    pub validation_count: u64,
    pub execution_count: u64,
    pub refinement_count: u64,
    pub security_violations: u64,
    pub successful_executions: u64,
}

impl RefinerStats {
    pub fn success_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.execution_count as f64
    }
}

pub struct RefinerAgent {
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptRegistry>,
    executor: Arc<dyn QueryExecutor>,
    config: RefinerConfig,
    validator: SqlSecurityValidator,
    stats: Mutex<RefinerStats>,
}

impl RefinerAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        executor: Arc<dyn QueryExecutor>,
        config: RefinerConfig,
    ) -> Self {
        Self {
            llm,
            prompts,
            executor,
            config,
            validator: SqlSecurityValidator::new(),
            stats: Mutex::new(RefinerStats::default()),
        }
    }

    pub async fn process(&self, message: &mut Message) -> AgentOutcome {
        if message.final_sql.is_empty() {
            return AgentOutcome::fail("No SQL query provided for validation");
        }

        // Safety gate. Terminal on violation: the orchestrator must not
        // loop back to the decomposer for these.
        let security = self.validator.validate(&message.final_sql);
        if !security.is_safe {
            {
                let mut stats = self.stats.lock().expect("refiner stats lock poisoned");
                stats.security_violations += 1;
            }
            let reason = security
                .error
                .clone()
                .or_else(|| security.detected_pattern.clone())
                .unwrap_or_else(|| "unsafe SQL".to_string());
            warn!("Security violation detected: {reason}");
            return AgentOutcome {
                success: false,
                error: Some(format!("Security violation: {reason}")),
                metadata: json!({
                    "security_violation": true,
                    "security_result": security,
                }),
            };
        }

        if self.config.enable_llm_validation {
            self.validate_with_llm(message).await;
        }

        let mut result = self.execute(&message.final_sql, &message.database_id).await;

        if !result.is_successful {
            let error_type = classify_sql_error(&result.error_text);
            if is_repairable(error_type, &result.error_text) {
                info!(
                    "Execution failed with {}, attempting refinement",
                    error_type.as_str()
                );
                result = self.refine_until_fixed(message, result).await;
            }
        }

        let outcome = AgentOutcome {
            success: result.is_successful,
            error: if result.is_successful {
                None
            } else {
                Some(result.error_text.clone())
            },
            metadata: json!({
                "refined": message.was_fixed,
                "row_count": result.rows.len(),
            }),
        };

        message.execution_result = Some(result);
        message.send_to = "System".to_string();
        outcome
    }

    async fn execute(&self, sql: &str, database_id: &str) -> SqlExecutionResult {
        {
            let mut stats = self.stats.lock().expect("refiner stats lock poisoned");
            stats.execution_count += 1;
        }

        let result = self
            .executor
            .execute(database_id, sql, self.config.execution_timeout_seconds)
            .await;

        if result.is_successful {
            let mut stats = self.stats.lock().expect("refiner stats lock poisoned");
            stats.successful_executions += 1;
        }
        result
    }

    /// Internal repair loop, bounded separately from the orchestrator's
    /// retry budget. Each round asks the LLM for a corrected query and
    /// re-executes it; a round that produces nothing new ends the loop.
    async fn refine_until_fixed(
        &self,
        message: &mut Message,
        mut result: SqlExecutionResult,
    ) -> SqlExecutionResult {
        let mut current_sql = message.final_sql.clone();

        for attempt in 1..=self.config.max_refinement_attempts {
            let refined = match self.refine_sql(message, &current_sql, &result.error_text).await {
                Some(refined) if refined != current_sql => refined,
                _ => break,
            };

            {
                let mut stats = self.stats.lock().expect("refiner stats lock poisoned");
                stats.refinement_count += 1;
            }

            info!("Refinement attempt {attempt}: re-executing corrected SQL");
            let refined_result = self.execute(&refined, &message.database_id).await;

            current_sql = refined.clone();
            message.final_sql = refined;
            result = refined_result;

            if result.is_successful {
                message.was_fixed = true;
                info!("SQL successfully refined and re-executed");
                break;
            }

            let error_type = classify_sql_error(&result.error_text);
            if !is_repairable(error_type, &result.error_text) {
                break;
            }
        }

        result
    }

    async fn refine_sql(
        &self,
        message: &Message,
        original_sql: &str,
        error_info: &str,
    ) -> Option<String> {
        let mut params = HashMap::new();
        params.insert("original_sql", original_sql.to_string());
        params.insert("error_info", error_info.to_string());
        params.insert("schema_info", message.schema_description.clone());
        params.insert("fk_info", message.foreign_key_description.clone());
        params.insert("question", message.question.clone());

        let (system, user) = match self.prompts.format("refiner", "sql_refinement", &params) {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!("Refinement prompt unavailable: {e}");
                return None;
            }
        };

        let response = self.llm.generate(&system, &user, 0.1, 1000).await;
        if !response.success {
            warn!(
                "Refinement LLM call failed: {}",
                response.error.as_deref().unwrap_or("unknown")
            );
            return None;
        }

        let refined = extract_sql(&response.content);
        if refined.is_empty() {
            return None;
        }

        // Refined SQL passes through the same safety gate.
        if !self.validator.validate(&refined).is_safe {
            warn!("Refined SQL rejected by security validation");
            return None;
        }

        Some(refined)
    }

    /// Advisory LLM pre-validation. Issues are logged and never block
    /// execution; only the rule-based gate is blocking.
    async fn validate_with_llm(&self, message: &Message) {
        {
            let mut stats = self.stats.lock().expect("refiner stats lock poisoned");
            stats.validation_count += 1;
        }

        let mut params = HashMap::new();
        params.insert("sql_query", message.final_sql.clone());
        params.insert("schema_info", message.schema_description.clone());
        params.insert("question", message.question.clone());

        let (system, user) = match self.prompts.format("refiner", "sql_validation", &params) {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!("Validation prompt unavailable: {e}");
                return;
            }
        };

        let response = self.llm.generate(&system, &user, 0.1, 800).await;
        if !response.success {
            return;
        }

        if let Some(report) = extract_json_object(&response.content) {
            if !report["is_valid"].as_bool().unwrap_or(true) {
                info!("LLM validation flagged issues, proceeding with execution anyway");
                for issue in report["syntax_errors"].as_array().into_iter().flatten() {
                    warn!("Syntax issue flagged: {issue}");
                }
                for issue in report["logical_issues"].as_array().into_iter().flatten() {
                    warn!("Logical issue flagged: {issue}");
                }
            }
        }
    }

    pub fn stats(&self) -> RefinerStats {
        self.stats
            .lock()
            .expect("refiner stats lock poisoned")
            .clone()
    }
}
