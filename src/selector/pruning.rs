use log::warn;
use serde_json::Value;
use std::collections::HashMap;

use crate::shared::config::PruningConfig;
use crate::shared::models::{ColumnSelection, DatabaseInfo, DatabaseStats};
use crate::shared::utils::estimate_token_count;

/// Whether the schema is complex enough to be worth pruning. Boundary
/// semantics: the column thresholds are strict (exactly 30 total with
/// average 6 stays unpruned) while the token limit is inclusive.
pub fn needs_pruning(stats: &DatabaseStats, schema_text: &str, config: &PruningConfig) -> bool {
    if stats.average_column_count > config.avg_column_threshold
        || stats.total_column_count > config.total_column_threshold
    {
        return true;
    }
    estimate_token_count(schema_text) >= config.token_limit
}

/// Parse the LLM pruning response into per-table decisions. Returns `None`
/// when nothing parseable came back, which callers treat as keep-everything.
pub fn parse_pruning_response(response: &Value) -> Option<HashMap<String, ColumnSelection>> {
    let decisions = response.get("pruning_decisions").or(Some(response))?;
    let map = decisions.as_object()?;

    let mut parsed = HashMap::new();
    for (table, value) in map {
        match ColumnSelection::from_json(value) {
            Some(selection) => {
                parsed.insert(table.clone(), selection);
            }
            None => {
                warn!("Unparseable pruning decision for table {table}: {value}");
            }
        }
    }

    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Enforce join feasibility on raw LLM decisions:
/// - primary-key columns are always retained for kept tables;
/// - the local column of a retained foreign key stays in the selection;
/// - a table referenced by a retained foreign key is kept at least
///   key-only, re-instating it if the LLM dropped it.
///
/// Tables the LLM did not mention are treated as dropped and may only come
/// back through foreign-key reinstatement.
pub fn enforce_key_constraints(
    decisions: &mut HashMap<String, ColumnSelection>,
    info: &DatabaseInfo,
) {
    for table in &info.tables {
        decisions
            .entry(table.clone())
            .or_insert(ColumnSelection::Drop);
    }

    // Primary keys first, so reinstated tables below start from a sane base.
    for table in &info.tables {
        if let Some(ColumnSelection::Keep(columns)) = decisions.get_mut(table) {
            if let Some(pks) = info.primary_key_map.get(table) {
                for pk in pks {
                    if !columns.contains(pk) {
                        columns.push(pk.clone());
                    }
                }
            }
        }
    }

    // Walk retained FK edges and pull their endpoints back in.
    let kept_tables: Vec<String> = info
        .tables
        .iter()
        .filter(|t| !matches!(decisions.get(*t), Some(ColumnSelection::Drop)))
        .cloned()
        .collect();

    for table in kept_tables {
        let fks = match info.foreign_key_map.get(&table) {
            Some(fks) => fks.clone(),
            None => continue,
        };

        for fk in fks {
            let local_retained = match decisions.get(&table) {
                Some(ColumnSelection::All) => true,
                Some(ColumnSelection::Keep(columns)) => columns.contains(&fk.column),
                _ => false,
            };
            if !local_retained {
                // Keep the join column alongside whatever was selected.
                if let Some(ColumnSelection::Keep(columns)) = decisions.get_mut(&table) {
                    columns.push(fk.column.clone());
                } else {
                    continue;
                }
            }

            let target = fk.foreign_table.clone();
            if !info.tables.contains(&target) {
                continue;
            }
            let target_dropped = matches!(decisions.get(&target), Some(ColumnSelection::Drop));
            if target_dropped {
                let mut key_columns: Vec<String> = info
                    .primary_key_map
                    .get(&target)
                    .cloned()
                    .unwrap_or_default();
                if !key_columns.contains(&fk.foreign_column) {
                    key_columns.push(fk.foreign_column.clone());
                }
                decisions.insert(target, ColumnSelection::Keep(key_columns));
            } else if let Some(ColumnSelection::Keep(columns)) = decisions.get_mut(&target) {
                if !columns.contains(&fk.foreign_column) {
                    columns.push(fk.foreign_column.clone());
                }
            }
        }
    }
}

/// True when the selection actually restricts the schema: at least one
/// table dropped or one column list shorter than the full table.
pub fn selection_restricts(
    decisions: &HashMap<String, ColumnSelection>,
    info: &DatabaseInfo,
) -> bool {
    for table in &info.tables {
        match decisions.get(table) {
            Some(ColumnSelection::Drop) | None => return true,
            Some(ColumnSelection::Keep(columns)) => {
                let full = info.description_map.get(table).map_or(0, |c| c.len());
                if columns.len() < full {
                    return true;
                }
            }
            Some(ColumnSelection::All) => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{ColumnInfo, ForeignKey};
    use serde_json::json;

    fn stats(total: usize, tables: usize) -> DatabaseStats {
        DatabaseStats {
            table_count: tables,
            max_column_count: total,
            total_column_count: total,
            average_column_count: total as f64 / tables as f64,
        }
    }

    #[test]
    fn boundary_thresholds() {
        let config = PruningConfig::default();
        // 30 columns over 5 tables: avg 6, total 30. Neither strict
        // threshold exceeded.
        assert!(!needs_pruning(&stats(30, 5), "small schema", &config));
        // 31 columns: total threshold exceeded.
        assert!(needs_pruning(&stats(31, 5), "small schema", &config));
        // avg over 6 with a small total.
        assert!(needs_pruning(&stats(28, 4), "small schema", &config));
    }

    #[test]
    fn token_limit_is_inclusive() {
        let config = PruningConfig {
            token_limit: 13,
            ..Default::default()
        };
        // 10 words * 1.3 = 13 tokens: at the limit, prune.
        let text = "a b c d e f g h i j";
        assert!(needs_pruning(&stats(10, 5), text, &config));

        let config = PruningConfig {
            token_limit: 14,
            ..Default::default()
        };
        assert!(!needs_pruning(&stats(10, 5), text, &config));
    }

    #[test]
    fn parses_decisions_and_rejects_garbage() {
        let response = json!({
            "pruning_decisions": {
                "schools": ["city", "sat_score"],
                "staff": "drop_all",
                "cities": "keep_all"
            },
            "reasoning": "x"
        });
        let parsed = parse_pruning_response(&response).unwrap();
        assert_eq!(parsed["staff"], ColumnSelection::Drop);
        assert_eq!(parsed["cities"], ColumnSelection::All);

        assert!(parse_pruning_response(&json!({"pruning_decisions": {}})).is_none());
        assert!(parse_pruning_response(&json!("not an object")).is_none());
    }

    fn two_table_info() -> DatabaseInfo {
        let mut info = DatabaseInfo::default();
        info.tables = vec!["schools".to_string(), "cities".to_string()];
        info.description_map.insert(
            "schools".to_string(),
            ["id", "city_id", "sat_score", "name"]
                .iter()
                .map(|n| ColumnInfo {
                    name: n.to_string(),
                    display_name: "text".into(),
                    comment: String::new(),
                })
                .collect(),
        );
        info.description_map.insert(
            "cities".to_string(),
            ["id", "name"]
                .iter()
                .map(|n| ColumnInfo {
                    name: n.to_string(),
                    display_name: "text".into(),
                    comment: String::new(),
                })
                .collect(),
        );
        info.primary_key_map
            .insert("schools".to_string(), vec!["id".to_string()]);
        info.primary_key_map
            .insert("cities".to_string(), vec!["id".to_string()]);
        info.foreign_key_map.insert(
            "schools".to_string(),
            vec![ForeignKey {
                column: "city_id".into(),
                foreign_table: "cities".into(),
                foreign_column: "id".into(),
            }],
        );
        info
    }

    #[test]
    fn primary_keys_are_always_retained() {
        let info = two_table_info();
        let mut decisions = HashMap::new();
        decisions.insert(
            "schools".to_string(),
            ColumnSelection::Keep(vec!["sat_score".to_string()]),
        );
        decisions.insert("cities".to_string(), ColumnSelection::All);

        enforce_key_constraints(&mut decisions, &info);

        match &decisions["schools"] {
            ColumnSelection::Keep(columns) => assert!(columns.contains(&"id".to_string())),
            other => panic!("unexpected selection: {other:?}"),
        }
    }

    #[test]
    fn fk_target_is_reinstated_key_only() {
        let info = two_table_info();
        let mut decisions = HashMap::new();
        decisions.insert(
            "schools".to_string(),
            ColumnSelection::Keep(vec!["city_id".to_string(), "sat_score".to_string()]),
        );
        decisions.insert("cities".to_string(), ColumnSelection::Drop);

        enforce_key_constraints(&mut decisions, &info);

        match &decisions["cities"] {
            ColumnSelection::Keep(columns) => {
                assert!(columns.contains(&"id".to_string()));
            }
            other => panic!("cities should be reinstated key-only, got {other:?}"),
        }
    }

    #[test]
    fn restriction_check() {
        let info = two_table_info();
        let mut decisions = HashMap::new();
        decisions.insert("schools".to_string(), ColumnSelection::All);
        decisions.insert("cities".to_string(), ColumnSelection::All);
        assert!(!selection_restricts(&decisions, &info));

        decisions.insert("cities".to_string(), ColumnSelection::Drop);
        assert!(selection_restricts(&decisions, &info));
    }
}
