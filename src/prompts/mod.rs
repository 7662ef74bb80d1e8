//! Registry of prompt templates keyed by (agent, prompt type).
//!
//! Templates are registered once at startup and immutable afterwards.
//! Formatting substitutes `{name}` placeholders and fails when a declared
//! parameter is missing; literal braces are written `{{` / `}}`.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
    #[error("Unknown prompt type '{prompt_type}' for agent '{agent}'")]
    UnknownPromptType { agent: String, prompt_type: String },
    #[error("Missing required parameters: {0:?}")]
    MissingParameters(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_template: String,
    pub parameters: Vec<&'static str>,
    pub description: &'static str,
}

impl PromptTemplate {
    fn new(
        system_prompt: &str,
        user_template: &str,
        parameters: Vec<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            user_template: user_template.to_string(),
            parameters,
            description,
        }
    }
}

pub struct PromptRegistry {
    templates: HashMap<(String, String), PromptTemplate>,
}

impl PromptRegistry {
    pub fn get(&self, agent: &str, prompt_type: &str) -> Result<&PromptTemplate, PromptError> {
        if !self.templates.keys().any(|(a, _)| a == agent) {
            return Err(PromptError::UnknownAgent(agent.to_string()));
        }
        self.templates
            .get(&(agent.to_string(), prompt_type.to_string()))
            .ok_or_else(|| PromptError::UnknownPromptType {
                agent: agent.to_string(),
                prompt_type: prompt_type.to_string(),
            })
    }

    /// Format a template into `(system_prompt, user_prompt)`. Every declared
    /// parameter must be present in `params`.
    pub fn format(
        &self,
        agent: &str,
        prompt_type: &str,
        params: &HashMap<&str, String>,
    ) -> Result<(String, String), PromptError> {
        let template = self.get(agent, prompt_type)?;

        let missing: Vec<String> = template
            .parameters
            .iter()
            .filter(|p| !params.contains_key(**p))
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PromptError::MissingParameters(missing));
        }

        let mut user_prompt = template.user_template.clone();
        for name in &template.parameters {
            let placeholder = format!("{{{}}}", name);
            user_prompt = user_prompt.replace(&placeholder, &params[*name]);
        }
        user_prompt = user_prompt.replace("{{", "{").replace("}}", "}");

        Ok((template.system_prompt.clone(), user_prompt))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn has(&self, agent: &str, prompt_type: &str) -> bool {
        self.templates
            .contains_key(&(agent.to_string(), prompt_type.to_string()))
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        let mut templates = HashMap::new();

        let mut register = |agent: &str, prompt_type: &str, template: PromptTemplate| {
            templates.insert((agent.to_string(), prompt_type.to_string()), template);
        };

        register(
            "selector",
            "schema_pruning",
            PromptTemplate::new(
                "You are an expert at database schema pruning for query optimization. Your task is to intelligently select relevant tables and columns based on a natural language question.\n\nGuidelines:\n1. Keep tables and columns that are directly relevant to the question\n2. Preserve foreign key relationships for joins\n3. Include ID columns for proper relationships\n4. Remove irrelevant tables completely\n5. For large tables, select only the most relevant columns",
                "**Schema Pruning Task**\n\nBased on the following natural language question, determine which tables and columns to keep from the database schema:\n\n**Question:** {question}\n\n**Database Schema:**\n{schema_info}\n\n**Foreign Key Relationships:**\n{fk_info}\n\n**Additional Context:**\n{evidence}\n\n**Pruning Instructions:**\nFor each table, decide:\n- \"keep_all\": Keep the entire table\n- \"drop_all\": Remove the table completely\n- [\"col1\", \"col2\", ...]: Keep only the listed columns\n\n**Output Format:**\nReturn a JSON object with the following structure:\n{{\n    \"pruning_decisions\": {{\n        \"table_name\": \"keep_all\" | \"drop_all\" | [\"column1\", \"column2\"]\n    }},\n    \"reasoning\": \"explanation of pruning decisions\"\n}}",
                vec!["question", "schema_info", "fk_info", "evidence"],
                "Prune a database schema down to what the question needs",
            ),
        );

        register(
            "decomposer",
            "query_decomposition",
            PromptTemplate::new(
                "You are an expert at analyzing natural language database questions and breaking them down into logical sub-steps.\n\nYour task is to decompose complex questions into simpler sub-questions that can be answered step by step. Each sub-question should be clear, specific, and answerable with a single SQL query.\n\nGuidelines:\n1. Break the question into logical sub-steps\n2. Each sub-question should be answerable with a single SQL query\n3. Maintain the logical flow from simple to complex\n4. Ensure all sub-questions contribute to answering the original question\n5. For simple questions, you may return just the original question",
                "**Query Decomposition Task**\n\n**Original Question:** {question}\n\n**Database Schema:**\n{schema_info}\n\n{evidence_section}{complexity_section}Please decompose this question into sub-questions following the guidelines above.\n\n**Output Format:**\nReturn a JSON object with the following structure:\n{{\n    \"sub_questions\": [\"Sub-question 1\", \"Sub-question 2\"],\n    \"reasoning\": \"Brief explanation of the decomposition approach\"\n}}",
                vec!["question", "schema_info", "evidence_section", "complexity_section"],
                "Decompose a complex question into ordered sub-questions",
            ),
        );

        register(
            "decomposer",
            "simple_sql_generation",
            PromptTemplate::new(
                "You are an expert SQL developer. Generate accurate, efficient SQL queries based on natural language questions and database schema information.\n\nRequirements:\n1. Generate syntactically correct SQL\n2. Use appropriate table and column names from the schema\n3. Follow SQL best practices\n4. Ensure the query logic matches the natural language question\n5. Return only the SQL query without explanations",
                "**SQL Generation Task**\n\n**Question:** {question}\n\n**Database Schema:**\n{schema_info}\n\n{fk_section}{context_section}Generate a SQL query that answers the question accurately.\n\n**Output:** Return only the SQL query, nothing else.",
                vec!["question", "schema_info", "fk_section", "context_section"],
                "Generate SQL for a single-step question",
            ),
        );

        register(
            "decomposer",
            "cot_sql_generation",
            PromptTemplate::new(
                "You are an expert SQL developer using Chain of Thought reasoning. Generate SQL by solving sub-questions step by step, then combining them into a final query.\n\nProcess:\n1. Address each sub-question with appropriate SQL logic\n2. Build the final query by integrating the sub-solutions\n3. Ensure the final SQL is syntactically correct and efficient\n4. Use CTEs, subqueries, or joins as appropriate",
                "**Chain of Thought SQL Generation**\n\n**Original Question:** {question}\n\n**Sub-questions to solve:**\n{sub_questions_list}\n\n**Database Schema:**\n{schema_info}\n\n{fk_section}{context_section}Using Chain of Thought reasoning, generate a SQL query that addresses all sub-questions and answers the original question.\n\n**Output:** Return only the final SQL query, nothing else.",
                vec![
                    "question",
                    "sub_questions_list",
                    "schema_info",
                    "fk_section",
                    "context_section",
                ],
                "Generate SQL from an ordered sub-question plan",
            ),
        );

        register(
            "refiner",
            "sql_validation",
            PromptTemplate::new(
                "You are an expert SQL validator and debugger. Your task is to analyze SQL queries for syntax errors, logical issues, and potential improvements.\n\nFocus on:\n1. Syntax correctness\n2. Logical consistency\n3. Performance considerations\n4. Security issues",
                "**SQL Validation Task**\n\n**SQL Query to Validate:**\n```sql\n{sql_query}\n```\n\n**Database Schema:**\n{schema_info}\n\n**Original Question:** {question}\n\n**Output Format:**\nReturn a JSON object with the following structure:\n{{\n    \"is_valid\": true,\n    \"syntax_errors\": [],\n    \"logical_issues\": [],\n    \"security_concerns\": [],\n    \"suggestions\": [],\n    \"corrected_sql\": \"\"\n}}",
                vec!["sql_query", "schema_info", "question"],
                "Advisory pre-execution validation of generated SQL",
            ),
        );

        register(
            "refiner",
            "sql_refinement",
            PromptTemplate::new(
                "You are an expert SQL developer specializing in query refinement and error correction. Your task is to fix SQL queries based on execution errors.\n\nGuidelines:\n1. Analyze the error message carefully\n2. Identify the root cause of the issue\n3. Apply appropriate fixes\n4. Ensure the corrected query maintains the original intent",
                "**SQL Refinement Task**\n\n**Original SQL Query:**\n```sql\n{original_sql}\n```\n\n**Error Information:**\n{error_info}\n\n**Database Schema:**\n{schema_info}\n\n**Foreign Key Relationships:**\n{fk_info}\n\n**Original Question:** {question}\n\nBased on the error information, provide a corrected SQL query that fixes the identified issues, maintains the original intent, and uses correct table and column names.\n\n**Output:** Return only the corrected SQL query, nothing else.",
                vec!["original_sql", "error_info", "schema_info", "fk_info", "question"],
                "Repair SQL that failed to execute",
            ),
        );

        Self { templates }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        entries
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    #[test]
    fn registry_contains_all_pipeline_prompts() {
        let registry = PromptRegistry::default();
        assert!(registry.has("selector", "schema_pruning"));
        assert!(registry.has("decomposer", "query_decomposition"));
        assert!(registry.has("decomposer", "simple_sql_generation"));
        assert!(registry.has("decomposer", "cot_sql_generation"));
        assert!(registry.has("refiner", "sql_validation"));
        assert!(registry.has("refiner", "sql_refinement"));
    }

    #[test]
    fn format_substitutes_parameters() {
        let registry = PromptRegistry::default();
        let (system, user) = registry
            .format(
                "decomposer",
                "simple_sql_generation",
                &params(&[
                    ("question", "List all users"),
                    ("schema_info", "# Table: users"),
                    ("fk_section", ""),
                    ("context_section", ""),
                ]),
            )
            .unwrap();

        assert!(system.contains("expert SQL developer"));
        assert!(user.contains("List all users"));
        assert!(user.contains("# Table: users"));
        assert!(!user.contains("{question}"));
    }

    #[test]
    fn format_rejects_missing_parameters() {
        let registry = PromptRegistry::default();
        let err = registry
            .format(
                "selector",
                "schema_pruning",
                &params(&[("question", "q"), ("schema_info", "s")]),
            )
            .unwrap_err();

        match err {
            PromptError::MissingParameters(missing) => {
                assert!(missing.contains(&"fk_info".to_string()));
                assert!(missing.contains(&"evidence".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_error() {
        let registry = PromptRegistry::default();
        assert!(matches!(
            registry.format("oracle", "anything", &HashMap::new()),
            Err(PromptError::UnknownAgent(_))
        ));
        assert!(matches!(
            registry.format("refiner", "missing", &HashMap::new()),
            Err(PromptError::UnknownPromptType { .. })
        ));
    }

    #[test]
    fn literal_braces_survive_formatting() {
        let registry = PromptRegistry::default();
        let (_, user) = registry
            .format(
                "decomposer",
                "query_decomposition",
                &params(&[
                    ("question", "q"),
                    ("schema_info", "s"),
                    ("evidence_section", ""),
                    ("complexity_section", ""),
                ]),
            )
            .unwrap();
        assert!(user.contains("\"sub_questions\""));
        assert!(user.contains('{'));
        assert!(!user.contains("{{"));
    }
}
