use regex::RegexBuilder;

use crate::shared::models::{RiskLevel, SecurityValidationResult};

/// Rule-based SQL safety gate. This check is blocking: anything it rejects
/// never reaches an executor.
pub struct SqlSecurityValidator {
    dangerous: Vec<regex::Regex>,
    suspicious: Vec<regex::Regex>,
}

const DANGEROUS_PATTERNS: &[&str] = &[
    r";\s*(drop|delete|update|insert|create|alter|truncate)\s+",
    r"union\s+select",
    r"exec\s*\(",
    r"xp_cmdshell",
    r"sp_executesql",
    r"--\s*$",
    r"/\*.*\*/",
    r"'.*'.*or.*'.*'.*=.*'.*'",
    r"\b1\s*=\s*1\b",
    r"or\s+1\s*=\s*1",
    r"and\s+1\s*=\s*1",
];

const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"sleep\s*\(",
    r"benchmark\s*\(",
    r"load_file\s*\(",
    r"into\s+outfile",
    r"into\s+dumpfile",
];

impl SqlSecurityValidator {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .multi_line(true)
                        .build()
                        .expect("static security pattern")
                })
                .collect()
        };
        Self {
            dangerous: compile(DANGEROUS_PATTERNS),
            suspicious: compile(SUSPICIOUS_PATTERNS),
        }
    }

    pub fn validate(&self, sql: &str) -> SecurityValidationResult {
        let sql_lower = sql.to_lowercase().trim().to_string();

        for (regex, pattern) in self.dangerous.iter().zip(DANGEROUS_PATTERNS) {
            if regex.is_match(&sql_lower) {
                return SecurityValidationResult {
                    is_safe: false,
                    risk_level: RiskLevel::High,
                    detected_pattern: Some(pattern.to_string()),
                    error: None,
                    recommendations: vec![
                        "Remove dangerous SQL operations".to_string(),
                        "Use parameterized queries".to_string(),
                    ],
                };
            }
        }

        if !sql_lower.starts_with("select") && !sql_lower.starts_with("with") {
            return SecurityValidationResult {
                is_safe: false,
                risk_level: RiskLevel::Medium,
                detected_pattern: None,
                error: Some("Only SELECT queries are allowed".to_string()),
                recommendations: vec![
                    "Use SELECT statements only".to_string(),
                    "Avoid data modification operations".to_string(),
                ],
            };
        }

        for (regex, pattern) in self.suspicious.iter().zip(SUSPICIOUS_PATTERNS) {
            if regex.is_match(&sql_lower) {
                return SecurityValidationResult {
                    is_safe: false,
                    risk_level: RiskLevel::Medium,
                    detected_pattern: Some(pattern.to_string()),
                    error: None,
                    recommendations: vec![
                        "Remove suspicious functions".to_string(),
                        "Use standard SQL operations only".to_string(),
                    ],
                };
            }
        }

        SecurityValidationResult::safe()
    }
}

impl Default for SqlSecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_stacked_mutation() {
        let validator = SqlSecurityValidator::new();
        let result = validator.validate("SELECT * FROM users; DROP TABLE users;");
        assert!(!result.is_safe);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert!(result.detected_pattern.is_some());
    }

    #[test]
    fn rejects_non_select_statements() {
        let validator = SqlSecurityValidator::new();
        let result = validator.validate("DELETE FROM users WHERE id = 1");
        assert!(!result.is_safe);
        assert_eq!(
            result.error.as_deref(),
            Some("Only SELECT queries are allowed")
        );
    }

    #[test]
    fn cte_queries_pass() {
        let validator = SqlSecurityValidator::new();
        let result = validator.validate(
            "WITH top_cities AS (SELECT city FROM schools GROUP BY city) SELECT * FROM top_cities",
        );
        assert!(result.is_safe);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn rejects_injection_heuristics() {
        let validator = SqlSecurityValidator::new();
        assert!(!validator.validate("SELECT * FROM users WHERE name = '' OR 1=1").is_safe);
        assert!(!validator
            .validate("SELECT * FROM users WHERE a = 'x' OR 'b' = 'b'")
            .is_safe);
        assert!(!validator.validate("SELECT id FROM t UNION SELECT password FROM pg_shadow").is_safe);
    }

    #[test]
    fn rejects_dangerous_functions() {
        let validator = SqlSecurityValidator::new();
        assert!(!validator.validate("SELECT SLEEP(10)").is_safe);
        assert!(!validator
            .validate("SELECT * FROM users INTO OUTFILE '/tmp/x'")
            .is_safe);
        assert!(!validator.validate("SELECT LOAD_FILE('/etc/passwd')").is_safe);
    }

    #[test]
    fn ordinary_selects_pass() {
        let validator = SqlSecurityValidator::new();
        assert!(validator
            .validate("SELECT name, city FROM schools WHERE city = 'Los Angeles'")
            .is_safe);
        assert!(validator
            .validate("SELECT AVG(sat_score) FROM schools GROUP BY city")
            .is_safe);
    }
}
