use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use super::history::{HistoryEntry, HistoryKind};
use crate::shared::models::{ErrorRecord, Message};

/// Pipeline position. The three agents are a closed set; routing enumerates
/// exactly these plus the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    Selector,
    Decomposer,
    Refiner,
    Completed,
    Failed,
    Error,
}

impl AgentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selector => "Selector",
            Self::Decomposer => "Decomposer",
            Self::Refiner => "Refiner",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Error => "Error",
        }
    }
}

/// Full orchestration state for one query. The conversation log is
/// append-only; retries derive their error view by filtering it, never
/// from a side channel.
pub struct WorkflowState {
    pub message: Message,
    pub current_agent: AgentStage,
    pub processing_stage: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub finished: bool,
    pub success: bool,
    pub result: Option<Value>,
    pub start_time: Instant,
    pub agent_execution_times: HashMap<String, f64>,
    pub conversation: Vec<HistoryEntry>,
}

impl WorkflowState {
    pub fn new(message: Message, max_retries: u32) -> Self {
        Self {
            message,
            current_agent: AgentStage::Selector,
            processing_stage: "initialized".to_string(),
            retry_count: 0,
            max_retries,
            finished: false,
            success: false,
            result: None,
            start_time: Instant::now(),
            agent_execution_times: HashMap::new(),
            conversation: Vec::new(),
        }
    }

    pub fn record_time(&mut self, agent: &str, started: Instant) {
        *self
            .agent_execution_times
            .entry(agent.to_string())
            .or_insert(0.0) += started.elapsed().as_secs_f64();
    }

    /// The error view for the current retry: every `ErrorContext` entry
    /// appended so far, decoded back into records.
    pub fn error_records(&self) -> Vec<ErrorRecord> {
        self.conversation
            .iter()
            .filter(|e| e.kind == HistoryKind::ErrorContext)
            .filter_map(|e| serde_json::from_value(e.metadata.clone()).ok())
            .collect()
    }

    pub fn finish(&mut self, stage: AgentStage, success: bool, result: Value) {
        self.current_agent = stage;
        self.finished = true;
        self.success = success;
        self.result = Some(result);
    }
}

/// Final payload returned to the caller. Success carries the SQL and rows;
/// failure carries the error, the last attempted SQL and the full error
/// history. Both record wall-clock and per-agent timing.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sql: Option<String>,
    pub processing_time: f64,
    pub retry_count: u32,
    pub per_agent_time: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_history: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_seconds: f64,
    pub retry_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub checks: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SqlErrorType;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn error_view_is_derived_from_the_log() {
        let message = Message::new("db", "q", "");
        let mut state = WorkflowState::new(message, 3);

        assert!(state.error_records().is_empty());

        let record = ErrorRecord {
            attempt_number: 1,
            failed_sql: "SELECT * FROM user".to_string(),
            error_message: "no such table: user".to_string(),
            error_type: SqlErrorType::SchemaError,
            timestamp: Utc::now(),
        };
        state.conversation.push(HistoryEntry::new(
            HistoryKind::ErrorContext,
            "execution failed",
            serde_json::to_value(&record).unwrap(),
        ));
        state.conversation.push(HistoryEntry::new(
            HistoryKind::System,
            "entering decomposer",
            json!({}),
        ));

        let records = state.error_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_type, SqlErrorType::SchemaError);
    }

    #[test]
    fn execution_times_accumulate_across_retries() {
        let message = Message::new("db", "q", "");
        let mut state = WorkflowState::new(message, 3);

        let t = Instant::now();
        state.record_time("refiner", t);
        state.record_time("refiner", t);
        assert!(state.agent_execution_times["refiner"] >= 0.0);
        assert_eq!(state.agent_execution_times.len(), 1);
    }

    #[test]
    fn finish_populates_terminal_invariant() {
        let message = Message::new("db", "q", "");
        let mut state = WorkflowState::new(message, 3);
        state.finish(AgentStage::Completed, true, json!({"sql": "SELECT 1"}));

        assert!(state.finished);
        assert!(state.success);
        assert!(matches!(
            state.current_agent,
            AgentStage::Completed | AgentStage::Failed
        ));
        assert!(state.result.is_some());
    }
}
