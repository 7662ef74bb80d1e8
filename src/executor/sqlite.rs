use async_trait::async_trait;
use log::warn;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::QueryExecutor;
use crate::errors::WorkflowError;
use crate::shared::models::{
    ColumnInfo, DatabaseInfo, DatabaseStats, ForeignKey, SqlExecutionResult,
};

/// File-based development engine resolving `{data_path}/{db_id}.sqlite`
/// (or `{data_path}/{db_id}/{db_id}.sqlite`). Used when no primary adapter
/// is injected.
pub struct SqliteExecutor {
    data_path: PathBuf,
}

impl SqliteExecutor {
    pub fn new(data_path: &str) -> Self {
        Self {
            data_path: PathBuf::from(data_path),
        }
    }

    fn database_path(&self, database_id: &str) -> Option<PathBuf> {
        let flat = self.data_path.join(format!("{database_id}.sqlite"));
        if flat.exists() {
            return Some(flat);
        }
        let nested = self
            .data_path
            .join(database_id)
            .join(format!("{database_id}.sqlite"));
        if nested.exists() {
            return Some(nested);
        }
        None
    }

    fn introspect_blocking(path: &Path) -> Result<DatabaseInfo, rusqlite::Error> {
        let conn = Connection::open(path)?;

        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let mut info = DatabaseInfo {
            tables: tables.clone(),
            ..Default::default()
        };

        for table in &tables {
            let mut columns = Vec::new();
            let mut primary_keys = Vec::new();

            let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
            let rows = stmt.query_map([], |row| {
                let name: String = row.get("name")?;
                let column_type: String = row.get("type")?;
                let pk: i64 = row.get("pk")?;
                Ok((name, column_type, pk))
            })?;
            for row in rows {
                let (name, column_type, pk) = row?;
                if pk > 0 {
                    primary_keys.push(name.clone());
                }
                columns.push(ColumnInfo {
                    name,
                    display_name: column_type,
                    comment: String::new(),
                });
            }

            let mut foreign_keys = Vec::new();
            let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list(\"{table}\")"))?;
            let rows = stmt.query_map([], |row| {
                let foreign_table: String = row.get("table")?;
                let column: String = row.get("from")?;
                let foreign_column: Option<String> = row.get("to")?;
                Ok(ForeignKey {
                    column,
                    foreign_table,
                    foreign_column: foreign_column.unwrap_or_else(|| "id".to_string()),
                })
            })?;
            for row in rows {
                foreign_keys.push(row?);
            }

            let samples = Self::sample_values(&conn, table, &columns)?;

            info.description_map.insert(table.clone(), columns);
            info.primary_key_map.insert(table.clone(), primary_keys);
            info.foreign_key_map.insert(table.clone(), foreign_keys);
            info.sample_value_map.insert(table.clone(), samples);
        }

        Ok(info)
    }

    fn sample_values(
        conn: &Connection,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Result<Vec<(String, String)>, rusqlite::Error> {
        let mut stmt = match conn.prepare(&format!("SELECT * FROM \"{table}\" LIMIT 3")) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!("Could not sample rows from {table}: {e}");
                return Ok(columns
                    .iter()
                    .map(|c| (c.name.clone(), String::new()))
                    .collect());
            }
        };

        let column_count = stmt.column_count();
        let mut per_column: Vec<Vec<String>> = vec![Vec::new(); column_count];

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, values) in per_column.iter_mut().enumerate() {
                match row.get_ref(i)? {
                    ValueRef::Null => {}
                    ValueRef::Integer(n) => values.push(n.to_string()),
                    ValueRef::Real(f) => values.push(f.to_string()),
                    ValueRef::Text(t) => values.push(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => {}
                }
            }
        }

        Ok(columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let joined = per_column
                    .get(i)
                    .map(|v| v.join(", "))
                    .unwrap_or_default();
                (c.name.clone(), joined)
            })
            .collect())
    }

    fn execute_blocking(path: &Path, sql: &str) -> Result<Vec<Vec<Value>>, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let mut stmt = conn.prepare(sql)?;
        let column_count = stmt.column_count();

        let mut out = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::from(n),
                    ValueRef::Real(f) => serde_json::json!(f),
                    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
                };
                values.push(value);
            }
            out.push(values);
        }
        Ok(out)
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn introspect(
        &self,
        database_id: &str,
    ) -> Result<(DatabaseInfo, DatabaseStats), WorkflowError> {
        let path = self
            .database_path(database_id)
            .ok_or_else(|| WorkflowError::DatabaseNotFound(database_id.to_string()))?;

        let info = tokio::task::spawn_blocking(move || Self::introspect_blocking(&path))
            .await
            .map_err(|e| WorkflowError::IntrospectionFailed(e.to_string()))?
            .map_err(|e| WorkflowError::IntrospectionFailed(e.to_string()))?;

        let stats = DatabaseStats::from_info(&info);
        Ok((info, stats))
    }

    async fn execute(
        &self,
        database_id: &str,
        sql: &str,
        timeout_seconds: u64,
    ) -> SqlExecutionResult {
        let start = Instant::now();

        let path = match self.database_path(database_id) {
            Some(path) => path,
            None => {
                return SqlExecutionResult::failure(
                    sql,
                    &format!("database not found: {database_id}"),
                    "DatabaseNotFound",
                    start.elapsed().as_secs_f64(),
                )
            }
        };

        let sql_owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || Self::execute_blocking(&path, &sql_owned));

        match tokio::time::timeout(Duration::from_secs(timeout_seconds), task).await {
            Ok(Ok(Ok(rows))) => SqlExecutionResult::success(sql, rows, start.elapsed().as_secs_f64()),
            Ok(Ok(Err(e))) => SqlExecutionResult::failure(
                sql,
                &e.to_string(),
                "SqliteError",
                start.elapsed().as_secs_f64(),
            ),
            Ok(Err(e)) => SqlExecutionResult::failure(
                sql,
                &format!("execution task failed: {e}"),
                "JoinError",
                start.elapsed().as_secs_f64(),
            ),
            Err(_) => SqlExecutionResult::failure(
                sql,
                &format!("execution timed out after {timeout_seconds} seconds"),
                "Timeout",
                start.elapsed().as_secs_f64(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_database(dir: &Path) -> String {
        let path = dir.join("shop.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cities (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE schools (
                 id INTEGER PRIMARY KEY,
                 name TEXT,
                 city_id INTEGER REFERENCES cities(id)
             );
             INSERT INTO cities VALUES (1, 'Los Angeles'), (2, 'Fresno');
             INSERT INTO schools VALUES (1, 'Northridge High', 1), (2, 'Valley Prep', 2);",
        )
        .unwrap();
        "shop".to_string()
    }

    #[tokio::test]
    async fn introspects_tables_keys_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        let db_id = fixture_database(dir.path());
        let executor = SqliteExecutor::new(dir.path().to_str().unwrap());

        let (info, stats) = executor.introspect(&db_id).await.unwrap();

        assert_eq!(info.tables, vec!["cities", "schools"]);
        assert_eq!(stats.table_count, 2);
        assert_eq!(stats.total_column_count, 5);
        assert_eq!(info.primary_key_map["schools"], vec!["id"]);

        let fks = &info.foreign_key_map["schools"];
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].column, "city_id");
        assert_eq!(fks[0].foreign_table, "cities");

        let samples = &info.sample_value_map["cities"];
        let name_samples = samples.iter().find(|(c, _)| c == "name").unwrap();
        assert!(name_samples.1.contains("Los Angeles"));
    }

    #[tokio::test]
    async fn executes_select_and_normalises_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_id = fixture_database(dir.path());
        let executor = SqliteExecutor::new(dir.path().to_str().unwrap());

        let result = executor
            .execute(&db_id, "SELECT id, name FROM cities ORDER BY id", 120)
            .await;

        assert!(result.is_successful);
        assert!(result.error_text.is_empty());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0], vec![json!(1), json!("Los Angeles")]);
    }

    #[tokio::test]
    async fn reports_engine_errors_in_result() {
        let dir = tempfile::tempdir().unwrap();
        let db_id = fixture_database(dir.path());
        let executor = SqliteExecutor::new(dir.path().to_str().unwrap());

        let result = executor.execute(&db_id, "SELECT * FROM missing", 120).await;

        assert!(!result.is_successful);
        assert!(result.error_text.contains("no such table"));
    }

    #[tokio::test]
    async fn unknown_database_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let executor = SqliteExecutor::new(dir.path().to_str().unwrap());

        let err = executor.introspect("nope").await.unwrap_err();
        assert!(matches!(err, WorkflowError::DatabaseNotFound(_)));
    }
}
