use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::errors::WorkflowError;
use crate::executor::QueryExecutor;
use crate::shared::models::{
    ColumnInfo, ColumnSelection, DatabaseInfo, DatabaseStats, ForeignKey,
};

/// Cached schema knowledge for one database.
pub struct CatalogEntry {
    pub info: DatabaseInfo,
    pub stats: DatabaseStats,
    pub description_json: Value,
}

/// Per-process schema cache. Entries are initialised exactly once per
/// database id (concurrent first callers share one introspection) and are
/// never evicted implicitly; `invalidate` is the only way out.
pub struct SchemaCatalog {
    executor: Arc<dyn QueryExecutor>,
    schema_path: PathBuf,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<CatalogEntry>>>>>,
}

impl SchemaCatalog {
    pub fn new(executor: Arc<dyn QueryExecutor>, schema_path: &str) -> Self {
        Self {
            executor,
            schema_path: PathBuf::from(schema_path),
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_load(&self, database_id: &str) -> Result<Arc<CatalogEntry>, WorkflowError> {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells
                .entry(database_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async { self.load(database_id).await.map(Arc::new) })
            .await
            .cloned()
    }

    pub async fn invalidate(&self, database_id: &str) {
        let mut cells = self.cells.lock().await;
        if cells.remove(database_id).is_some() {
            info!("Invalidated schema cache for {database_id}");
        }
    }

    async fn load(&self, database_id: &str) -> Result<CatalogEntry, WorkflowError> {
        match self.executor.introspect(database_id).await {
            Ok((info, stats)) => {
                info!(
                    "Introspected schema for {database_id}: {} tables, {} columns",
                    stats.table_count, stats.total_column_count
                );
                let description_json = describe_as_json(&info, &stats);
                Ok(CatalogEntry {
                    info,
                    stats,
                    description_json,
                })
            }
            Err(e) => {
                warn!("Live introspection of {database_id} failed: {e}, trying schema export");
                self.load_from_json(database_id)
            }
        }
    }

    fn load_from_json(&self, database_id: &str) -> Result<CatalogEntry, WorkflowError> {
        let path = self.schema_path.join(format!("{database_id}.json"));
        let raw = std::fs::read_to_string(&path)
            .map_err(|_| WorkflowError::DatabaseNotFound(database_id.to_string()))?;
        let data: Value = serde_json::from_str(&raw)
            .map_err(|e| WorkflowError::IntrospectionFailed(format!("bad schema export: {e}")))?;

        let tables = data["tables"]
            .as_object()
            .ok_or_else(|| {
                WorkflowError::IntrospectionFailed("schema export has no tables".to_string())
            })?;

        let mut info = DatabaseInfo::default();
        for (table, table_info) in tables {
            info.tables.push(table.clone());

            let columns: Vec<ColumnInfo> = table_info["columns"]
                .as_array()
                .map(|cols| {
                    cols.iter()
                        .map(|c| ColumnInfo {
                            name: c["name"].as_str().unwrap_or("").to_string(),
                            display_name: c["type"].as_str().unwrap_or("").to_string(),
                            comment: c["description"].as_str().unwrap_or("").to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let primary_keys: Vec<String> = table_info["primary_keys"]
                .as_array()
                .map(|keys| {
                    keys.iter()
                        .filter_map(|k| k.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            let foreign_keys: Vec<ForeignKey> = table_info["foreign_keys"]
                .as_array()
                .map(|fks| {
                    fks.iter()
                        .map(|fk| ForeignKey {
                            column: fk["from"].as_str().unwrap_or("").to_string(),
                            foreign_table: fk["to_table"].as_str().unwrap_or("").to_string(),
                            foreign_column: fk["to_column"].as_str().unwrap_or("").to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let sample_values: Vec<(String, String)> = table_info["sample_values"]
                .as_object()
                .map(|samples| {
                    samples
                        .iter()
                        .map(|(col, v)| (col.clone(), v.as_str().unwrap_or("").to_string()))
                        .collect()
                })
                .unwrap_or_default();

            info.description_map.insert(table.clone(), columns);
            info.primary_key_map.insert(table.clone(), primary_keys);
            info.foreign_key_map.insert(table.clone(), foreign_keys);
            info.sample_value_map.insert(table.clone(), sample_values);
        }

        let stats = DatabaseStats::from_info(&info);
        let description_json = describe_as_json(&info, &stats);
        Ok(CatalogEntry {
            info,
            stats,
            description_json,
        })
    }
}

fn describe_as_json(info: &DatabaseInfo, stats: &DatabaseStats) -> Value {
    let tables: serde_json::Map<String, Value> = info
        .tables
        .iter()
        .map(|table| {
            let columns: Vec<Value> = info
                .description_map
                .get(table)
                .map(|cols| {
                    cols.iter()
                        .map(|c| {
                            serde_json::json!({
                                "name": c.name,
                                "type": c.display_name,
                                "description": c.comment
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let value = serde_json::json!({
                "columns": columns,
                "primary_keys": info.primary_key_map.get(table).cloned().unwrap_or_default(),
                "foreign_keys": info
                    .foreign_key_map
                    .get(table)
                    .map(|fks| {
                        fks.iter()
                            .map(|fk| serde_json::json!({
                                "from": fk.column,
                                "to_table": fk.foreign_table,
                                "to_column": fk.foreign_column
                            }))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default(),
                "sample_values": info
                    .sample_value_map
                    .get(table)
                    .map(|samples| {
                        samples
                            .iter()
                            .map(|(col, v)| (col.clone(), Value::String(v.clone())))
                            .collect::<serde_json::Map<_, _>>()
                    })
                    .unwrap_or_default()
            });
            (table.clone(), value)
        })
        .collect();

    serde_json::json!({
        "tables": tables,
        "statistics": {
            "table_count": stats.table_count,
            "total_columns": stats.total_column_count,
            "avg_columns": stats.average_column_count
        }
    })
}

/// Render the schema description and foreign-key text, optionally scoped to
/// a pruning selection. Tables marked `Drop` (or absent from the selection)
/// are omitted; foreign keys are listed only when both ends survive.
pub fn render_schema(
    info: &DatabaseInfo,
    selection: Option<&HashMap<String, ColumnSelection>>,
) -> (String, String) {
    let mut desc_parts: Vec<String> = Vec::new();
    let mut included: Vec<&String> = Vec::new();

    for table in &info.tables {
        let columns = match info.description_map.get(table) {
            Some(columns) => columns,
            None => continue,
        };

        let selected: Vec<&ColumnInfo> = match selection {
            None => columns.iter().collect(),
            Some(map) => match map.get(table) {
                Some(ColumnSelection::All) => columns.iter().collect(),
                Some(ColumnSelection::Keep(kept)) => columns
                    .iter()
                    .filter(|c| kept.contains(&c.name))
                    .collect(),
                Some(ColumnSelection::Drop) | None => continue,
            },
        };
        if selected.is_empty() {
            continue;
        }
        included.push(table);

        let samples: HashMap<&str, &str> = info
            .sample_value_map
            .get(table)
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(col, v)| (col.as_str(), v.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        desc_parts.push(format!("# Table: {table}"));
        desc_parts.push("[".to_string());
        for (i, column) in selected.iter().enumerate() {
            let mut line = format!("  ({}", column.name);
            if !column.display_name.is_empty() {
                line.push_str(&format!(", {}", column.display_name));
            }
            if let Some(values) = samples.get(column.name.as_str()) {
                if !values.is_empty() {
                    line.push_str(&format!(". Value examples: [{values}]"));
                }
            }
            if !column.comment.is_empty() {
                line.push_str(&format!(". {}", column.comment));
            }
            line.push(')');
            if i + 1 < selected.len() {
                line.push(',');
            }
            desc_parts.push(line);
        }
        desc_parts.push("]".to_string());
        desc_parts.push(String::new());
    }

    let mut fk_parts: Vec<String> = Vec::new();
    for table in &included {
        if let Some(fks) = info.foreign_key_map.get(*table) {
            for fk in fks {
                if included.iter().any(|t| *t == &fk.foreign_table) {
                    fk_parts.push(format!(
                        "{}.{} = {}.{}",
                        table, fk.column, fk.foreign_table, fk.foreign_column
                    ));
                }
            }
        }
    }

    (desc_parts.join("\n").trim().to_string(), fk_parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_info() -> DatabaseInfo {
        let mut info = DatabaseInfo::default();
        info.tables = vec!["cities".to_string(), "schools".to_string()];
        info.description_map.insert(
            "cities".to_string(),
            vec![
                ColumnInfo {
                    name: "id".into(),
                    display_name: "integer".into(),
                    comment: String::new(),
                },
                ColumnInfo {
                    name: "name".into(),
                    display_name: "text".into(),
                    comment: "city name".into(),
                },
            ],
        );
        info.description_map.insert(
            "schools".to_string(),
            vec![
                ColumnInfo {
                    name: "id".into(),
                    display_name: "integer".into(),
                    comment: String::new(),
                },
                ColumnInfo {
                    name: "city_id".into(),
                    display_name: "integer".into(),
                    comment: String::new(),
                },
                ColumnInfo {
                    name: "sat_score".into(),
                    display_name: "real".into(),
                    comment: "average SAT".into(),
                },
            ],
        );
        info.primary_key_map
            .insert("cities".to_string(), vec!["id".to_string()]);
        info.primary_key_map
            .insert("schools".to_string(), vec!["id".to_string()]);
        info.foreign_key_map.insert(
            "schools".to_string(),
            vec![ForeignKey {
                column: "city_id".into(),
                foreign_table: "cities".into(),
                foreign_column: "id".into(),
            }],
        );
        info.foreign_key_map.insert("cities".to_string(), vec![]);
        info.sample_value_map.insert(
            "cities".to_string(),
            vec![
                ("id".to_string(), "1, 2".to_string()),
                ("name".to_string(), "Los Angeles, Fresno".to_string()),
            ],
        );
        info.sample_value_map.insert("schools".to_string(), vec![]);
        info
    }

    #[test]
    fn renders_full_schema_with_samples_and_fks() {
        let info = sample_info();
        let (desc, fk) = render_schema(&info, None);

        assert!(desc.contains("# Table: cities"));
        assert!(desc.contains("(name, text. Value examples: [Los Angeles, Fresno]. city name)"));
        assert!(desc.contains("# Table: schools"));
        assert_eq!(fk, "schools.city_id = cities.id");
    }

    #[test]
    fn selection_drops_tables_and_columns() {
        let info = sample_info();
        let mut selection = HashMap::new();
        selection.insert("cities".to_string(), ColumnSelection::Drop);
        selection.insert(
            "schools".to_string(),
            ColumnSelection::Keep(vec!["id".to_string(), "sat_score".to_string()]),
        );

        let (desc, fk) = render_schema(&info, Some(&selection));
        assert!(!desc.contains("# Table: cities"));
        assert!(desc.contains("(sat_score"));
        assert!(!desc.contains("(city_id"));
        // FK target dropped, so the edge disappears too.
        assert!(fk.is_empty());
    }

    #[test]
    fn json_description_carries_statistics() {
        let info = sample_info();
        let stats = DatabaseStats::from_info(&info);
        let json = describe_as_json(&info, &stats);
        assert_eq!(json["statistics"]["table_count"], 2);
        assert_eq!(json["tables"]["schools"]["primary_keys"][0], "id");
    }
}
