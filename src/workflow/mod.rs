//! Workflow orchestrator: drives the Message through Selector → Decomposer
//! → Refiner, owns the retry-with-context loop and produces the final
//! structured result.

use log::{error, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::decomposer::DecomposerAgent;
use crate::errors::classify_sql_error;
use crate::prompts::PromptRegistry;
use crate::refiner::RefinerAgent;
use crate::retrieval::TrainingService;
use crate::selector::SelectorAgent;
use crate::shared::models::{ErrorRecord, Message};
use crate::vector::VectorStore;

pub mod history;
pub mod state;

pub use history::{HistoryEntry, HistoryKind, HistoryStore, InMemoryHistoryStore};
pub use state::{AgentStage, HealthReport, QueryOutcome, WorkflowState, WorkflowStats};

#[derive(Default)]
struct Totals {
    total: u64,
    successful: u64,
    failed: u64,
    total_latency: f64,
    total_retries: u64,
}

pub struct Orchestrator {
    selector: SelectorAgent,
    decomposer: DecomposerAgent,
    refiner: RefinerAgent,
    history: Arc<dyn HistoryStore>,
    training: Option<Arc<TrainingService>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    prompts: Arc<PromptRegistry>,
    max_retries: u32,
    totals: Mutex<Totals>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: SelectorAgent,
        decomposer: DecomposerAgent,
        refiner: RefinerAgent,
        history: Arc<dyn HistoryStore>,
        training: Option<Arc<TrainingService>>,
        vector_store: Option<Arc<dyn VectorStore>>,
        prompts: Arc<PromptRegistry>,
        max_retries: u32,
    ) -> Self {
        Self {
            selector,
            decomposer,
            refiner,
            history,
            training,
            vector_store,
            prompts,
            max_retries,
            totals: Mutex::new(Totals::default()),
        }
    }

    pub async fn process_query(
        &self,
        database_id: &str,
        question: &str,
        evidence: &str,
        user_id: Option<&str>,
        thread_id: Option<&str>,
    ) -> QueryOutcome {
        let started = Instant::now();

        if question.trim().is_empty() {
            let outcome = QueryOutcome {
                success: false,
                sql: None,
                rows: None,
                error: Some("Invalid message: question must not be empty".to_string()),
                last_sql: None,
                processing_time: started.elapsed().as_secs_f64(),
                retry_count: 0,
                per_agent_time: HashMap::new(),
                error_history: Vec::new(),
            };
            self.record_totals(&outcome);
            return outcome;
        }

        let mut message = Message::new(database_id, question, evidence);
        message.max_retries = self.max_retries;
        if let Some(user_id) = user_id {
            message.sender = Some(user_id.to_string());
        }

        if let Some(thread_id) = thread_id {
            self.load_thread_context(&mut message, thread_id).await;
        }

        let mut state = WorkflowState::new(message, self.max_retries);
        self.run_state_machine(&mut state, thread_id).await;
        let outcome = self.finalize(state, started, thread_id).await;
        self.record_totals(&outcome);
        outcome
    }

    async fn run_state_machine(&self, state: &mut WorkflowState, thread_id: Option<&str>) {
        loop {
            match state.current_agent {
                AgentStage::Selector => {
                    self.append_entry(
                        state,
                        thread_id,
                        HistoryEntry::new(
                            HistoryKind::System,
                            format!(
                                "Selecting schema for database '{}'",
                                state.message.database_id
                            ),
                            json!({"question": state.message.question}),
                        ),
                    )
                    .await;

                    let t = Instant::now();
                    let outcome = self.selector.process(&mut state.message).await;
                    state.record_time("selector", t);

                    if !outcome.success {
                        let reason = outcome.error.unwrap_or_else(|| "unknown".to_string());
                        error!("Selector failed: {reason}");
                        state.processing_stage = "selector_failed".to_string();
                        state.finish(
                            AgentStage::Failed,
                            false,
                            json!({"error": format!("Selector failed: {reason}")}),
                        );
                        return;
                    }
                    state.processing_stage = "schema_selection_completed".to_string();
                    state.current_agent = AgentStage::Decomposer;
                }

                AgentStage::Decomposer => {
                    // The error view is always derived from the log, so a
                    // retry sees every prior refiner failure.
                    let records = state.error_records();
                    state.message.error_context_available = !records.is_empty();
                    state.message.error_history = records;
                    state.message.retry_count = state.retry_count;

                    self.append_entry(
                        state,
                        thread_id,
                        HistoryEntry::new(
                            HistoryKind::System,
                            "Generating SQL",
                            json!({
                                "retry_count": state.retry_count,
                                "error_context": state.message.error_context_available,
                            }),
                        ),
                    )
                    .await;

                    let t = Instant::now();
                    let outcome = self.decomposer.process(&mut state.message).await;
                    state.record_time("decomposer", t);

                    if !outcome.success {
                        let reason = outcome.error.unwrap_or_else(|| "unknown".to_string());
                        error!("Decomposer failed: {reason}");
                        state.processing_stage = "decomposer_failed".to_string();
                        state.finish(
                            AgentStage::Failed,
                            false,
                            json!({"error": format!("Decomposer failed: {reason}")}),
                        );
                        return;
                    }
                    state.processing_stage = "sql_generation_completed".to_string();
                    state.current_agent = AgentStage::Refiner;
                }

                AgentStage::Refiner => {
                    self.append_entry(
                        state,
                        thread_id,
                        HistoryEntry::new(
                            HistoryKind::System,
                            "Validating and executing SQL",
                            json!({"sql": state.message.final_sql}),
                        ),
                    )
                    .await;

                    let t = Instant::now();
                    let outcome = self.refiner.process(&mut state.message).await;
                    state.record_time("refiner", t);
                    state.processing_stage = "sql_validation_completed".to_string();

                    if outcome.success {
                        state.finish(AgentStage::Completed, true, json!({}));
                        return;
                    }

                    let reason = outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());

                    // Security violations are terminal: retry is forbidden.
                    if outcome.metadata["security_violation"].as_bool() == Some(true) {
                        warn!("Terminating on security violation");
                        state.finish(AgentStage::Failed, false, json!({"error": reason}));
                        return;
                    }

                    // A refiner node fault (nothing executed at all) does
                    // not consume the retry loop.
                    if state.message.execution_result.is_none() {
                        error!("Refiner failed: {reason}");
                        state.finish(
                            AgentStage::Failed,
                            false,
                            json!({"error": format!("Refiner failed: {reason}")}),
                        );
                        return;
                    }

                    self.handle_sql_failure(state, thread_id, &reason).await;
                    if state.finished {
                        return;
                    }
                }

                AgentStage::Completed | AgentStage::Failed | AgentStage::Error => return,
            }
        }
    }

    async fn handle_sql_failure(
        &self,
        state: &mut WorkflowState,
        thread_id: Option<&str>,
        error_text: &str,
    ) {
        let error_type = classify_sql_error(error_text);
        let record = ErrorRecord {
            attempt_number: state.error_records().len() as u32 + 1,
            failed_sql: state.message.final_sql.clone(),
            error_message: error_text.to_string(),
            error_type,
            timestamp: chrono::Utc::now(),
        };
        self.append_entry(
            state,
            thread_id,
            HistoryEntry::new(
                HistoryKind::ErrorContext,
                format!("SQL execution failed ({})", error_type.as_str()),
                serde_json::to_value(&record).unwrap_or(json!({})),
            ),
        )
        .await;

        // A second timeout terminates even with retry budget left.
        let timeout_failures = state
            .error_records()
            .iter()
            .filter(|r| {
                let text = r.error_message.to_lowercase();
                text.contains("timed out") || text.contains("timeout")
            })
            .count();
        if timeout_failures >= 2 {
            warn!("Terminating after repeated execution timeouts");
            state.finish(AgentStage::Failed, false, json!({"error": error_text}));
            return;
        }

        if state.retry_count < state.max_retries {
            state.retry_count += 1;
            state.processing_stage = "retry_sql_generation".to_string();
            info!(
                "SQL failed ({}), retrying {}/{}",
                error_type.as_str(),
                state.retry_count,
                state.max_retries
            );
            state.current_agent = AgentStage::Decomposer;
        } else {
            error!("SQL failed and retry budget exhausted: {error_text}");
            state.finish(AgentStage::Failed, false, json!({"error": error_text}));
        }
    }

    async fn finalize(
        &self,
        state: WorkflowState,
        started: Instant,
        thread_id: Option<&str>,
    ) -> QueryOutcome {
        let processing_time = started.elapsed().as_secs_f64();
        let error_history = state.error_records();

        if state.success {
            let rows = state
                .message
                .execution_result
                .as_ref()
                .map(|r| r.rows.clone())
                .unwrap_or_default();

            if let Some(thread_id) = thread_id {
                self.history
                    .append(
                        thread_id,
                        HistoryEntry::new(
                            HistoryKind::Agent,
                            "Query resolved",
                            json!({
                                "question": state.message.question,
                                "sql": state.message.final_sql,
                            }),
                        ),
                    )
                    .await;
            }

            // Learning is best-effort and must never hold up the caller.
            if let Some(training) = self.training.clone() {
                let question = state.message.question.clone();
                let sql = state.message.final_sql.clone();
                let database_id = state.message.database_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = training
                        .auto_train_from_successful_query(&question, &sql, &database_id)
                        .await
                    {
                        warn!("Auto-training failed: {e}");
                    }
                });
            }

            info!(
                "Query resolved in {processing_time:.2}s with {} retries",
                state.retry_count
            );
            QueryOutcome {
                success: true,
                sql: Some(state.message.final_sql.clone()),
                rows: Some(rows),
                error: None,
                last_sql: None,
                processing_time,
                retry_count: state.retry_count,
                per_agent_time: state.agent_execution_times,
                error_history,
            }
        } else {
            let error = state
                .result
                .as_ref()
                .and_then(|r| r["error"].as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "query processing failed".to_string());
            let last_sql = if state.message.final_sql.is_empty() {
                None
            } else {
                Some(state.message.final_sql.clone())
            };

            QueryOutcome {
                success: false,
                sql: None,
                rows: None,
                error: Some(error),
                last_sql,
                processing_time,
                retry_count: state.retry_count,
                per_agent_time: state.agent_execution_times,
                error_history,
            }
        }
    }

    /// Surface the previous interaction of this thread so the decomposer
    /// can resolve references like "them" against it.
    async fn load_thread_context(&self, message: &mut Message, thread_id: &str) {
        let entries = self.history.entries(thread_id).await;
        let prior = entries
            .iter()
            .rev()
            .find(|e| e.kind == HistoryKind::Agent && e.metadata["sql"].is_string());

        if let Some(entry) = prior {
            message.context.insert(
                "prior_interaction".to_string(),
                json!({
                    "question": entry.metadata["question"],
                    "sql": entry.metadata["sql"],
                }),
            );
        }
    }

    async fn append_entry(
        &self,
        state: &mut WorkflowState,
        thread_id: Option<&str>,
        entry: HistoryEntry,
    ) {
        if let Some(thread_id) = thread_id {
            self.history.append(thread_id, entry.clone()).await;
        }
        state.conversation.push(entry);
    }

    fn record_totals(&self, outcome: &QueryOutcome) {
        let mut totals = self.totals.lock().expect("workflow totals lock poisoned");
        totals.total += 1;
        if outcome.success {
            totals.successful += 1;
        } else {
            totals.failed += 1;
        }
        totals.total_latency += outcome.processing_time;
        totals.total_retries += outcome.retry_count as u64;
    }

    pub fn get_stats(&self) -> WorkflowStats {
        let totals = self.totals.lock().expect("workflow totals lock poisoned");
        WorkflowStats {
            total: totals.total,
            successful: totals.successful,
            failed: totals.failed,
            avg_latency_seconds: if totals.total > 0 {
                totals.total_latency / totals.total as f64
            } else {
                0.0
            },
            retry_rate: if totals.total > 0 {
                totals.total_retries as f64 / totals.total as f64
            } else {
                0.0
            },
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        let mut checks = HashMap::new();

        let required = [
            ("selector", "schema_pruning"),
            ("decomposer", "query_decomposition"),
            ("decomposer", "simple_sql_generation"),
            ("decomposer", "cot_sql_generation"),
            ("refiner", "sql_validation"),
            ("refiner", "sql_refinement"),
        ];
        checks.insert(
            "prompt_registry".to_string(),
            required.iter().all(|(a, p)| self.prompts.has(a, p)),
        );

        match &self.vector_store {
            Some(store) => {
                checks.insert("vector_store".to_string(), store.stats().await.is_ok());
            }
            None => {
                checks.insert("vector_store".to_string(), true);
            }
        }

        let healthy = checks.values().all(|ok| *ok);
        HealthReport {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            checks,
        }
    }
}
