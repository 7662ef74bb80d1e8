use regex::Regex;
use std::collections::HashSet;

/// Approximate token count as word count scaled for sub-word splitting.
/// Good enough for budget checks without shipping a tokenizer model.
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 1.3) as usize
}

/// Token-set Jaccard similarity over lowercased whitespace tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Table names referenced by FROM/JOIN clauses of a query.
pub fn extract_table_names_from_sql(sql: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)(?:FROM|JOIN)\s+[`"]?(\w+)[`"]?"#).expect("static regex");
    let mut names = Vec::new();
    for cap in re.captures_iter(sql) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Table names declared by CREATE TABLE statements.
pub fn extract_table_names_from_ddl(ddl: &str) -> Vec<String> {
    let re = Regex::new(r#"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?[`"]?(\w+)[`"]?"#)
        .expect("static regex");
    let mut names = Vec::new();
    for cap in re.captures_iter(ddl) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Cosine similarity between two vectors of equal dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_scales_word_count() {
        assert_eq!(estimate_token_count(""), 0);
        assert_eq!(estimate_token_count("one two three four"), 5);
    }

    #[test]
    fn jaccard_identity_and_disjoint() {
        assert!((jaccard_similarity("a b c", "a b c") - 1.0).abs() < f64::EPSILON);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert_eq!(jaccard_similarity("", "a"), 0.0);
    }

    #[test]
    fn extracts_tables_from_sql() {
        let sql = "SELECT s.city FROM schools s JOIN scores sc ON s.id = sc.school_id";
        assert_eq!(extract_table_names_from_sql(sql), vec!["schools", "scores"]);
    }

    #[test]
    fn extracts_tables_from_ddl() {
        let ddl = "CREATE TABLE IF NOT EXISTS `users` (id INTEGER PRIMARY KEY)";
        assert_eq!(extract_table_names_from_ddl(ddl), vec!["users"]);
    }

    #[test]
    fn cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
