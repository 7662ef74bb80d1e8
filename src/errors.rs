use serde::{Deserialize, Serialize};

/// Core failure taxonomy. Configuration and agent faults are terminal for
/// the current query; SQL faults are consumed by the retry loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),
    #[error("Selector failed: {0}")]
    SelectorFailed(String),
    #[error("Decomposer failed: {0}")]
    DecomposerFailed(String),
    #[error("Refiner failed: {0}")]
    RefinerFailed(String),
    #[error("Security violation: {0}")]
    SecurityViolation(String),
    #[error("Execution timed out after {0} seconds")]
    ExecutionTimeout(u64),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Introspection failed: {0}")]
    IntrospectionFailed(String),
    #[error("No SQL query provided")]
    NoSql,
}

/// Closed classification of executor errors, assigned by string-pattern
/// matching over the error text the engine returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorType {
    SyntaxError,
    SchemaError,
    LogicError,
    ExecutionError,
    UnknownError,
}

impl SqlErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::SchemaError => "schema_error",
            Self::LogicError => "logic_error",
            Self::ExecutionError => "execution_error",
            Self::UnknownError => "unknown_error",
        }
    }
}

/// Classify an executor error message into the closed taxonomy.
///
/// Schema patterns are checked before syntax: engines phrase unknown-column
/// errors in many ways ("no such column", "does not exist") and some of
/// those messages also mention "error".
pub fn classify_sql_error(error_text: &str) -> SqlErrorType {
    let text = error_text.to_lowercase();

    let schema_patterns = [
        "no such table",
        "no such column",
        "unknown column",
        "unknown table",
        "does not exist",
        "doesn't exist",
        "undefined column",
        "undefined table",
        "foreign key",
    ];
    if schema_patterns.iter().any(|p| text.contains(p)) {
        return SqlErrorType::SchemaError;
    }

    let logic_patterns = [
        "group by",
        "having",
        "misuse of aggregate",
        "aggregate function",
        "ambiguous column",
        "not contained in either an aggregate",
    ];
    if logic_patterns.iter().any(|p| text.contains(p)) {
        return SqlErrorType::LogicError;
    }

    let syntax_patterns = ["syntax error", "parse error", "unrecognized token", "near \""];
    if syntax_patterns.iter().any(|p| text.contains(p)) {
        return SqlErrorType::SyntaxError;
    }

    let execution_patterns = [
        "timeout",
        "timed out",
        "connection",
        "permission",
        "denied",
        "locked",
        "too many",
        "out of memory",
        "resource",
    ];
    if execution_patterns.iter().any(|p| text.contains(p)) {
        return SqlErrorType::ExecutionError;
    }

    SqlErrorType::UnknownError
}

/// Whether an error class is worth an LLM repair attempt. Timeouts and
/// permission problems are environmental, not fixable by rewriting SQL.
pub fn is_repairable(error_type: SqlErrorType, error_text: &str) -> bool {
    match error_type {
        SqlErrorType::ExecutionError => {
            let text = error_text.to_lowercase();
            !(text.contains("timeout")
                || text.contains("timed out")
                || text.contains("permission")
                || text.contains("denied"))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_schema_errors() {
        assert_eq!(
            classify_sql_error("no such table: user"),
            SqlErrorType::SchemaError
        );
        assert_eq!(
            classify_sql_error("ERROR: column \"sat\" does not exist"),
            SqlErrorType::SchemaError
        );
    }

    #[test]
    fn classifies_syntax_and_logic_errors() {
        assert_eq!(
            classify_sql_error("syntax error at or near \"FORM\""),
            SqlErrorType::SyntaxError
        );
        assert_eq!(
            classify_sql_error("misuse of aggregate: AVG()"),
            SqlErrorType::LogicError
        );
        assert_eq!(
            classify_sql_error("column must appear in the GROUP BY clause"),
            SqlErrorType::LogicError
        );
    }

    #[test]
    fn classifies_execution_and_unknown() {
        assert_eq!(
            classify_sql_error("connection refused"),
            SqlErrorType::ExecutionError
        );
        assert_eq!(
            classify_sql_error("statement timeout"),
            SqlErrorType::ExecutionError
        );
        assert_eq!(classify_sql_error("weird failure"), SqlErrorType::UnknownError);
    }

    #[test]
    fn timeouts_and_permissions_are_not_repairable() {
        assert!(!is_repairable(
            SqlErrorType::ExecutionError,
            "statement timed out"
        ));
        assert!(!is_repairable(
            SqlErrorType::ExecutionError,
            "permission denied for table users"
        ));
        assert!(is_repairable(SqlErrorType::SchemaError, "no such table"));
        assert!(is_repairable(SqlErrorType::SyntaxError, "syntax error"));
    }
}
