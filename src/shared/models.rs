use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::SqlErrorType;

/// Shared record mutated in place as it moves through the pipeline.
/// Each agent reads the fields of the previous stage and writes its own.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sender: Option<String>,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub context: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,

    pub database_id: String,
    pub question: String,
    pub evidence: String,
    pub send_to: String,

    // Selector outputs
    pub extracted_schema: HashMap<String, ColumnSelection>,
    pub schema_description: String,
    pub foreign_key_description: String,
    pub was_pruned: bool,

    // Decomposer outputs
    pub final_sql: String,
    pub qa_pairs: String,
    pub sub_questions: Vec<String>,
    pub decomposition_strategy: DecompositionStrategy,

    // Refiner outputs
    pub execution_result: Option<SqlExecutionResult>,
    pub was_fixed: bool,

    // Error carrier for retry-aware regeneration
    pub error_history: Vec<ErrorRecord>,
    pub error_context_available: bool,
}

impl Message {
    pub fn new(database_id: &str, question: &str, evidence: &str) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sender: None,
            priority: 2,
            retry_count: 0,
            max_retries: 3,
            context: HashMap::new(),
            metadata: HashMap::new(),
            database_id: database_id.to_string(),
            question: question.to_string(),
            evidence: evidence.to_string(),
            send_to: "Selector".to_string(),
            extracted_schema: HashMap::new(),
            schema_description: String::new(),
            foreign_key_description: String::new(),
            was_pruned: false,
            final_sql: String::new(),
            qa_pairs: String::new(),
            sub_questions: Vec::new(),
            decomposition_strategy: DecompositionStrategy::Simple,
            execution_result: None,
            was_fixed: false,
            error_history: Vec::new(),
            error_context_available: false,
        }
    }
}

/// Per-table column selection produced by schema pruning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelection {
    All,
    Drop,
    Keep(Vec<String>),
}

impl ColumnSelection {
    /// Parse a pruning decision from the LLM JSON: `"keep_all"`,
    /// `"drop_all"` or a list of column names.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => match s.as_str() {
                "keep_all" | "all" => Some(Self::All),
                "drop_all" | "drop" => Some(Self::Drop),
                _ => None,
            },
            Value::Array(items) => {
                let columns: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                if columns.len() == items.len() {
                    Some(Self::Keep(columns))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::All => Value::String("keep_all".to_string()),
            Self::Drop => Value::String("drop_all".to_string()),
            Self::Keep(columns) => {
                Value::Array(columns.iter().map(|c| Value::String(c.clone())).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    Simple,
    Cot,
}

impl DecompositionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Cot => "cot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub display_name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Introspected metadata for one database. `tables` preserves the order the
/// engine reported so rendered descriptions stay stable between calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub tables: Vec<String>,
    pub description_map: HashMap<String, Vec<ColumnInfo>>,
    pub sample_value_map: HashMap<String, Vec<(String, String)>>,
    pub primary_key_map: HashMap<String, Vec<String>>,
    pub foreign_key_map: HashMap<String, Vec<ForeignKey>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub table_count: usize,
    pub max_column_count: usize,
    pub total_column_count: usize,
    pub average_column_count: f64,
}

impl DatabaseStats {
    pub fn from_info(info: &DatabaseInfo) -> Self {
        let table_count = info.tables.len();
        let mut total = 0usize;
        let mut max = 0usize;
        for table in &info.tables {
            let count = info.description_map.get(table).map_or(0, |c| c.len());
            total += count;
            max = max.max(count);
        }
        Self {
            table_count,
            max_column_count: max,
            total_column_count: total,
            average_column_count: if table_count > 0 {
                total as f64 / table_count as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingDataType {
    Ddl,
    Documentation,
    SqlExample,
    QaPair,
    DomainKnowledge,
}

impl TrainingDataType {
    pub const ALL: [TrainingDataType; 5] = [
        Self::Ddl,
        Self::Documentation,
        Self::SqlExample,
        Self::QaPair,
        Self::DomainKnowledge,
    ];

    /// Short tag stored in vector-store payloads and used in read filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ddl => "ddl",
            Self::Documentation => "doc",
            Self::SqlExample => "sql",
            Self::QaPair => "qa_pair",
            Self::DomainKnowledge => "domain",
        }
    }
}

/// One unit of the retrieval corpus. `data_type` is fixed at creation and
/// the embedding dimension always equals the store-wide constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: String,
    pub data_type: TrainingDataType,
    pub database_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub question: Option<String>,
    pub sql: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlExecutionResult {
    pub sql: String,
    pub rows: Vec<Vec<Value>>,
    pub error_text: String,
    pub exception_class: String,
    pub execution_time_seconds: f64,
    pub is_successful: bool,
}

impl SqlExecutionResult {
    pub fn success(sql: &str, rows: Vec<Vec<Value>>, execution_time_seconds: f64) -> Self {
        Self {
            sql: sql.to_string(),
            rows,
            error_text: String::new(),
            exception_class: String::new(),
            execution_time_seconds,
            is_successful: true,
        }
    }

    pub fn failure(
        sql: &str,
        error_text: &str,
        exception_class: &str,
        execution_time_seconds: f64,
    ) -> Self {
        Self {
            sql: sql.to_string(),
            rows: Vec::new(),
            error_text: error_text.to_string(),
            exception_class: exception_class.to_string(),
            execution_time_seconds,
            is_successful: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub attempt_number: u32,
    pub failed_sql: String,
    pub error_message: String,
    pub error_type: SqlErrorType,
    pub timestamp: DateTime<Utc>,
}

/// Structured agent response. Agents mutate the shared [`Message`] and
/// report status here instead of raising across agent boundaries.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Value,
}

impl AgentOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            metadata: Value::Null,
        }
    }

    pub fn ok_with(metadata: Value) -> Self {
        Self {
            success: true,
            error: None,
            metadata,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            metadata: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityValidationResult {
    pub is_safe: bool,
    pub risk_level: RiskLevel,
    pub detected_pattern: Option<String>,
    pub error: Option<String>,
    pub recommendations: Vec<String>,
}

impl SecurityValidationResult {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            risk_level: RiskLevel::Low,
            detected_pattern: None,
            error: None,
            recommendations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_selection_parses_directives_and_lists() {
        assert_eq!(
            ColumnSelection::from_json(&json!("keep_all")),
            Some(ColumnSelection::All)
        );
        assert_eq!(
            ColumnSelection::from_json(&json!("drop_all")),
            Some(ColumnSelection::Drop)
        );
        assert_eq!(
            ColumnSelection::from_json(&json!(["id", "name"])),
            Some(ColumnSelection::Keep(vec![
                "id".to_string(),
                "name".to_string()
            ]))
        );
        assert_eq!(ColumnSelection::from_json(&json!(42)), None);
        assert_eq!(ColumnSelection::from_json(&json!(["id", 3])), None);
    }

    #[test]
    fn stats_derive_from_info() {
        let mut info = DatabaseInfo::default();
        info.tables = vec!["a".to_string(), "b".to_string()];
        info.description_map.insert(
            "a".to_string(),
            vec![
                ColumnInfo {
                    name: "id".into(),
                    display_name: "integer".into(),
                    comment: String::new(),
                },
                ColumnInfo {
                    name: "name".into(),
                    display_name: "text".into(),
                    comment: String::new(),
                },
            ],
        );
        info.description_map.insert(
            "b".to_string(),
            vec![ColumnInfo {
                name: "id".into(),
                display_name: "integer".into(),
                comment: String::new(),
            }],
        );

        let stats = DatabaseStats::from_info(&info);
        assert_eq!(stats.table_count, 2);
        assert_eq!(stats.total_column_count, 3);
        assert_eq!(stats.max_column_count, 2);
        assert!((stats.average_column_count - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn execution_result_success_invariant() {
        let ok = SqlExecutionResult::success("SELECT 1", vec![vec![json!(1)]], 0.01);
        assert!(ok.is_successful);
        assert!(ok.error_text.is_empty());

        let err = SqlExecutionResult::failure("SELECT x", "no such column: x", "QueryError", 0.0);
        assert!(!err.is_successful);
        assert!(!err.error_text.is_empty());
    }
}
