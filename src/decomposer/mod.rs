//! Query Decomposer: scores question complexity, optionally decomposes into
//! sub-questions, retrieves context from the training corpus and
//! synthesises the final SQL. When error context from prior refiner
//! failures is present, regeneration embeds the failed attempts and a
//! do-not-repeat directive.

use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::llm::{extract_json_object, extract_sql, LlmProvider};
use crate::prompts::PromptRegistry;
use crate::retrieval::{RagRetriever, RetrievalStrategy, RetrievedContext};
use crate::shared::config::{DatasetProfile, DecompositionConfig};
use crate::shared::models::{
    AgentOutcome, DecompositionStrategy, ErrorRecord, Message,
};

pub mod complexity;

pub use complexity::ComplexityIndicators;

#[derive(Debug, Default, Clone, Serialize)]
pub struct DecomposerStats {
    pub total_queries: u64,
    pub simple_queries: u64,
    pub complex_queries: u64,
    pub avg_sub_questions: f64,
    pub rag_enhanced_queries: u64,
    pub retry_queries: u64,
}

pub struct DecomposerAgent {
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<PromptRegistry>,
    retriever: Option<Arc<RagRetriever>>,
    config: DecompositionConfig,
    stats: Mutex<DecomposerStats>,
}

impl DecomposerAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<PromptRegistry>,
        retriever: Option<Arc<RagRetriever>>,
        config: DecompositionConfig,
    ) -> Self {
        Self {
            llm,
            prompts,
            retriever,
            config,
            stats: Mutex::new(DecomposerStats::default()),
        }
    }

    pub async fn process(&self, message: &mut Message) -> AgentOutcome {
        if message.schema_description.is_empty() {
            return AgentOutcome::fail("Missing database schema description");
        }

        if message.error_context_available && !message.error_history.is_empty() {
            info!(
                "Regenerating SQL with {} prior error records",
                message.error_history.len()
            );
            return self.process_with_error_context(message).await;
        }

        self.process_normal(message).await
    }

    async fn process_normal(&self, message: &mut Message) -> AgentOutcome {
        let sub_questions = self.decompose(message).await;
        let context = self.retrieve_context(message).await;

        let sql = match self.generate_sql(message, &sub_questions, &context).await {
            Ok(sql) => sql,
            Err(outcome) => return outcome,
        };

        message.final_sql = sql;
        message.sub_questions = sub_questions.clone();
        message.decomposition_strategy = if sub_questions.len() > 1 {
            DecompositionStrategy::Cot
        } else {
            DecompositionStrategy::Simple
        };
        message.qa_pairs = self.build_trace(&sub_questions, &message.final_sql, &context);
        message.send_to = "Refiner".to_string();

        self.record_stats(&sub_questions, &context);
        info!(
            "Decomposed into {} sub-question(s), strategy {}",
            sub_questions.len(),
            message.decomposition_strategy.as_str()
        );

        AgentOutcome::ok_with(json!({
            "sub_question_count": sub_questions.len(),
            "rag_enhanced": !context.is_empty(),
        }))
    }

    async fn process_with_error_context(&self, message: &mut Message) -> AgentOutcome {
        let patterns = analyze_error_patterns(&message.error_history);
        let prompt = self.build_error_aware_prompt(message, &patterns);

        let response = self.llm.generate("", &prompt, 0.1, 2000).await;
        let sql = if response.success {
            extract_sql(&response.content)
        } else {
            String::new()
        };

        if sql.is_empty() {
            // Enriched regeneration failed: run the normal path so the
            // retry still produces a candidate.
            warn!("Error-aware regeneration produced no SQL, using the standard path");
            return self.process_normal(message).await;
        }

        message.final_sql = sql;
        message.qa_pairs = build_error_aware_trace(message, &patterns);
        message.send_to = "Refiner".to_string();

        {
            let mut stats = self.stats.lock().expect("decomposer stats lock poisoned");
            stats.retry_queries += 1;
        }

        AgentOutcome::ok_with(json!({
            "retry_with_error_context": true,
            "error_patterns": patterns,
        }))
    }

    async fn decompose(&self, message: &Message) -> Vec<String> {
        let indicators = ComplexityIndicators::analyze(&message.question);
        let score = indicators.score();

        let should_decompose = indicators.is_complex()
            || (score == 3 && self.config.profile == DatasetProfile::Bird);
        if !should_decompose {
            return vec![message.question.clone()];
        }

        let evidence_section = if message.evidence.is_empty() {
            String::new()
        } else {
            format!("**Additional Evidence:**\n{}\n\n", message.evidence)
        };
        let mut complexity_section = format!(
            "**Complexity Analysis:**\nComplexity score: {score}/8\nDetected patterns:\n"
        );
        for label in indicators.active_labels() {
            complexity_section.push_str(&format!("- {label}\n"));
        }
        complexity_section.push('\n');

        let mut params = HashMap::new();
        params.insert("question", message.question.clone());
        params.insert("schema_info", message.schema_description.clone());
        params.insert("evidence_section", evidence_section);
        params.insert("complexity_section", complexity_section);

        let (system, user) = match self
            .prompts
            .format("decomposer", "query_decomposition", &params)
        {
            Ok(prompts) => prompts,
            Err(e) => {
                warn!("Decomposition prompt unavailable: {e}");
                return vec![message.question.clone()];
            }
        };

        let response = self.llm.generate(&system, &user, 0.1, 1000).await;
        if !response.success {
            warn!(
                "LLM decomposition failed: {}, using the question as-is",
                response.error.as_deref().unwrap_or("unknown")
            );
            return vec![message.question.clone()];
        }

        match extract_json_object(&response.content) {
            Some(parsed) => {
                let sub_questions: Vec<String> = parsed["sub_questions"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .take(self.config.max_sub_questions)
                            .collect()
                    })
                    .unwrap_or_default();
                if sub_questions.is_empty() {
                    warn!("Malformed decomposition, using the question as-is");
                    vec![message.question.clone()]
                } else {
                    sub_questions
                }
            }
            None => {
                warn!("Malformed decomposition, using the question as-is");
                vec![message.question.clone()]
            }
        }
    }

    async fn retrieve_context(&self, message: &Message) -> RetrievedContext {
        let retriever = match &self.retriever {
            Some(retriever) => retriever,
            None => return RetrievedContext::default(),
        };

        let strategy = match self.config.profile {
            DatasetProfile::Bird => RetrievalStrategy::ContextFocused,
            DatasetProfile::Spider => RetrievalStrategy::SqlFocused,
            DatasetProfile::Generic => RetrievalStrategy::Balanced,
        };

        match retriever
            .retrieve_context(&message.question, &message.database_id, strategy)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Context retrieval failed: {e}");
                RetrievedContext::default()
            }
        }
    }

    async fn generate_sql(
        &self,
        message: &Message,
        sub_questions: &[String],
        context: &RetrievedContext,
    ) -> Result<String, AgentOutcome> {
        let fk_section = if message.foreign_key_description.is_empty() {
            String::new()
        } else {
            format!(
                "**Foreign Key Relationships:**\n{}\n\n",
                message.foreign_key_description
            )
        };

        let mut context_section = self
            .retriever
            .as_ref()
            .map(|r| r.compose_context_block(context))
            .unwrap_or_default();
        if let Some(prior) = message.context.get("prior_interaction") {
            let question = prior["question"].as_str().unwrap_or("");
            let sql = prior["sql"].as_str().unwrap_or("");
            if !question.is_empty() && !sql.is_empty() {
                context_section.push_str(&format!(
                    "\n**Previous Interaction In This Conversation:**\nQ: {question}\nSQL: {sql}\nResolve references like \"them\" or \"those\" against this previous question.\n"
                ));
            }
        }
        if !context_section.is_empty() {
            context_section.push('\n');
        }

        let (system, user) = if sub_questions.len() == 1 {
            let mut params = HashMap::new();
            params.insert("question", sub_questions[0].clone());
            params.insert("schema_info", message.schema_description.clone());
            params.insert("fk_section", fk_section);
            params.insert("context_section", context_section);
            self.prompts
                .format("decomposer", "simple_sql_generation", &params)
        } else {
            let numbered = sub_questions
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}. {q}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
            let mut params = HashMap::new();
            params.insert("question", message.question.clone());
            params.insert("sub_questions_list", numbered);
            params.insert("schema_info", message.schema_description.clone());
            params.insert("fk_section", fk_section);
            params.insert("context_section", context_section);
            self.prompts
                .format("decomposer", "cot_sql_generation", &params)
        }
        .map_err(|e| AgentOutcome::fail(format!("Prompt formatting failed: {e}")))?;

        let response = self.llm.generate(&system, &user, 0.1, 2000).await;
        if !response.success {
            return Err(AgentOutcome::fail(format!(
                "LLM unavailable: {}",
                response.error.as_deref().unwrap_or("unknown")
            )));
        }

        let sql = extract_sql(&response.content);
        if sql.is_empty() {
            return Err(AgentOutcome::fail("LLM returned no extractable SQL"));
        }
        Ok(sql)
    }

    fn build_trace(
        &self,
        sub_questions: &[String],
        final_sql: &str,
        context: &RetrievedContext,
    ) -> String {
        let mut parts = vec!["# Current Query Decomposition".to_string()];
        for (i, question) in sub_questions.iter().enumerate() {
            parts.push(format!("Sub-question {}: {question}", i + 1));
        }
        parts.push(format!("Final SQL: {final_sql}"));
        parts.push(String::new());

        if !context.qa_pairs.is_empty() {
            parts.push("# Related Historical Examples".to_string());
            for (i, pair) in context.qa_pairs.iter().take(3).enumerate() {
                parts.push(format!("Example {}:", i + 1));
                parts.push(format!("Q: {}", pair.question));
                parts.push(format!("A: {}", pair.sql));
                parts.push(String::new());
            }
        }

        parts.join("\n")
    }

    fn build_error_aware_prompt(&self, message: &Message, patterns: &[String]) -> String {
        let mut prompt = format!(
            "# Text2SQL Task\n\nConvert the following natural language question to SQL:\n\n**Question:** {}\n\n**Database Schema:**\n{}\n\n**Foreign Key Relations:**\n{}\n\n**Evidence:**\n{}\n",
            message.question,
            message.schema_description,
            message.foreign_key_description,
            message.evidence
        );

        if let Some(prior) = message.context.get("prior_interaction") {
            let question = prior["question"].as_str().unwrap_or("");
            let sql = prior["sql"].as_str().unwrap_or("");
            if !question.is_empty() && !sql.is_empty() {
                prompt.push_str(&format!(
                    "\n**Previous Interaction In This Conversation:**\nQ: {question}\nSQL: {sql}\n"
                ));
            }
        }

        prompt.push_str("\n# Previous Attempts Analysis\n\nThe following SQL generation attempts have failed. Learn from these mistakes:\n\n");
        for record in &message.error_history {
            prompt.push_str(&format!(
                "## Attempt {}\n\n**Failed SQL Query:**\n```sql\n{}\n```\n\n**Error Message:** {}\n\n**Error Type:** {}\n\n",
                record.attempt_number,
                record.failed_sql,
                record.error_message,
                record.error_type.as_str()
            ));
        }

        if !patterns.is_empty() {
            prompt.push_str("## Common Error Patterns Identified\n\n");
            for pattern in patterns {
                prompt.push_str(&format!("- {pattern}\n"));
            }
            prompt.push('\n');
        }

        prompt.push_str(
            "## Instructions for Next Attempt\nBased on the failed attempts above:\n1. Do not repeat any of the mistakes shown\n2. Pay special attention to the error types and messages\n3. If table or column names were wrong, double-check the schema information\n4. If syntax errors occurred, be extra careful with SQL syntax\n\nReturn only the corrected SQL query.\n",
        );

        prompt
    }

    fn record_stats(&self, sub_questions: &[String], context: &RetrievedContext) {
        let mut stats = self.stats.lock().expect("decomposer stats lock poisoned");
        let previous_total = stats.total_queries as f64;
        stats.total_queries += 1;
        if sub_questions.len() == 1 {
            stats.simple_queries += 1;
        } else {
            stats.complex_queries += 1;
        }
        if !context.is_empty() {
            stats.rag_enhanced_queries += 1;
        }
        stats.avg_sub_questions = (stats.avg_sub_questions * previous_total
            + sub_questions.len() as f64)
            / stats.total_queries as f64;
    }

    pub fn stats(&self) -> DecomposerStats {
        self.stats
            .lock()
            .expect("decomposer stats lock poisoned")
            .clone()
    }
}

/// Summarise repeated failure patterns across the error history.
pub fn analyze_error_patterns(error_history: &[ErrorRecord]) -> Vec<String> {
    let mut patterns = Vec::new();
    if error_history.is_empty() {
        return patterns;
    }

    let mut type_counts: HashMap<&str, usize> = HashMap::new();
    for record in error_history {
        *type_counts.entry(record.error_type.as_str()).or_insert(0) += 1;
    }
    for (error_type, count) in &type_counts {
        if *count > 1 {
            patterns.push(format!("Repeated {error_type} errors ({count} times)"));
        }
    }

    let messages: Vec<&str> = error_history
        .iter()
        .map(|r| r.error_message.as_str())
        .filter(|m| !m.is_empty())
        .collect();
    if messages.len() > 1 {
        let unique: std::collections::HashSet<&&str> = messages.iter().collect();
        if unique.len() < messages.len() {
            patterns.push("Some identical error messages repeated".to_string());
        }
    }

    let prefixes: Vec<String> = error_history
        .iter()
        .map(|r| {
            r.failed_sql
                .trim()
                .chars()
                .take(50)
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|s| !s.is_empty())
        .collect();
    if prefixes.len() > 1 {
        let unique: std::collections::HashSet<&String> = prefixes.iter().collect();
        if unique.len() < prefixes.len() {
            patterns.push("Similar SQL query structures attempted multiple times".to_string());
        }
    }

    patterns
}

fn build_error_aware_trace(message: &Message, patterns: &[String]) -> String {
    let mut parts = vec![
        "# Error-Aware Query Processing".to_string(),
        format!("Original Question: {}", message.question),
    ];

    if !patterns.is_empty() {
        parts.push("\n## Identified Error Patterns:".to_string());
        for pattern in patterns {
            parts.push(format!("- {pattern}"));
        }
    }

    parts.push("\n## Generated SQL (with error context):".to_string());
    parts.push(message.final_sql.clone());

    parts.push("\n## Previous Attempts Summary:".to_string());
    parts.push(format!(
        "Total failed attempts: {}",
        message.error_history.len()
    ));
    let mut error_types: Vec<&str> = message
        .error_history
        .iter()
        .map(|r| r.error_type.as_str())
        .collect();
    error_types.sort_unstable();
    error_types.dedup();
    parts.push(format!(
        "Error types encountered: {}",
        error_types.join(", ")
    ));

    parts.join("\n")
}
