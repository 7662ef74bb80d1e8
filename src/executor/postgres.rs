use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::Text;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::QueryExecutor;
use crate::errors::WorkflowError;
use crate::shared::config::DatabaseConfig;
use crate::shared::models::{
    ColumnInfo, DatabaseInfo, DatabaseStats, ForeignKey, SqlExecutionResult,
};

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(QueryableByName)]
struct TableRow {
    #[diesel(sql_type = Text)]
    table_name: String,
}

#[derive(QueryableByName)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
    #[diesel(sql_type = Text)]
    data_type: String,
    #[diesel(sql_type = Text)]
    comment: String,
}

#[derive(QueryableByName)]
struct KeyColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
}

#[derive(QueryableByName)]
struct ForeignKeyRow {
    #[diesel(sql_type = Text)]
    column_name: String,
    #[diesel(sql_type = Text)]
    foreign_table: String,
    #[diesel(sql_type = Text)]
    foreign_column: String,
}

#[derive(QueryableByName)]
struct JsonRows {
    #[diesel(sql_type = Text)]
    rows: String,
}

/// Primary-engine adapter for Postgres. Arbitrary SELECTs are wrapped in a
/// `json_agg` subquery so results come back in one text column regardless
/// of their shape; pools are created lazily per database id.
pub struct PostgresExecutor {
    base_url: String,
    max_connections: u32,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresExecutor {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            max_connections: config.max_connections,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pool_for(&self, database_id: &str) -> Result<PgPool, String> {
        let mut pools = self.pools.lock().expect("pool map lock poisoned");
        if let Some(pool) = pools.get(database_id) {
            return Ok(pool.clone());
        }

        let url = format!("{}/{}", self.base_url, database_id);
        let manager = ConnectionManager::<PgConnection>::new(url);
        let pool = Pool::builder()
            .max_size(self.max_connections)
            .build(manager)
            .map_err(|e| format!("failed to connect to {database_id}: {e}"))?;

        pools.insert(database_id.to_string(), pool.clone());
        Ok(pool)
    }

    fn introspect_blocking(conn: &mut PgPooled) -> QueryResult<DatabaseInfo> {
        let tables: Vec<TableRow> = diesel::sql_query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .load(conn)?;

        let mut info = DatabaseInfo::default();
        info.tables = tables.into_iter().map(|t| t.table_name).collect();

        for table in info.tables.clone() {
            let columns: Vec<ColumnRow> = diesel::sql_query(
                "SELECT c.column_name, c.data_type, \
                        COALESCE(pgd.description, '') AS comment \
                 FROM information_schema.columns c \
                 LEFT JOIN pg_catalog.pg_statio_all_tables st \
                   ON st.relname = c.table_name AND st.schemaname = c.table_schema \
                 LEFT JOIN pg_catalog.pg_description pgd \
                   ON pgd.objoid = st.relid AND pgd.objsubid = c.ordinal_position \
                 WHERE c.table_schema = 'public' AND c.table_name = $1 \
                 ORDER BY c.ordinal_position",
            )
            .bind::<Text, _>(&table)
            .load(conn)?;

            let primary_keys: Vec<KeyColumnRow> = diesel::sql_query(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.table_schema = tc.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'PRIMARY KEY' \
                 ORDER BY kcu.ordinal_position",
            )
            .bind::<Text, _>(&table)
            .load(conn)?;

            let foreign_keys: Vec<ForeignKeyRow> = diesel::sql_query(
                "SELECT kcu.column_name, \
                        ccu.table_name AS foreign_table, \
                        ccu.column_name AS foreign_column \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON kcu.constraint_name = tc.constraint_name \
                  AND kcu.table_schema = tc.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name \
                  AND ccu.table_schema = tc.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'FOREIGN KEY'",
            )
            .bind::<Text, _>(&table)
            .load(conn)?;

            let column_infos: Vec<ColumnInfo> = columns
                .into_iter()
                .map(|c| ColumnInfo {
                    name: c.column_name,
                    display_name: c.data_type,
                    comment: c.comment,
                })
                .collect();

            let samples = Self::sample_blocking(conn, &table, &column_infos);

            info.primary_key_map.insert(
                table.clone(),
                primary_keys.into_iter().map(|k| k.column_name).collect(),
            );
            info.foreign_key_map.insert(
                table.clone(),
                foreign_keys
                    .into_iter()
                    .map(|fk| ForeignKey {
                        column: fk.column_name,
                        foreign_table: fk.foreign_table,
                        foreign_column: fk.foreign_column,
                    })
                    .collect(),
            );
            info.sample_value_map.insert(table.clone(), samples);
            info.description_map.insert(table, column_infos);
        }

        Ok(info)
    }

    fn sample_blocking(
        conn: &mut PgPooled,
        table: &str,
        columns: &[ColumnInfo],
    ) -> Vec<(String, String)> {
        let rows = Self::query_json_rows(conn, &format!("SELECT * FROM \"{table}\" LIMIT 3"))
            .unwrap_or_default();

        columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let values: Vec<String> = rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .filter(|v| !v.is_null())
                    .map(render_scalar)
                    .collect();
                (c.name.clone(), values.join(", "))
            })
            .collect()
    }

    fn query_json_rows(conn: &mut PgPooled, sql: &str) -> Result<Vec<Vec<Value>>, String> {
        let wrapped = format!(
            "SELECT COALESCE(json_agg(row_to_json(t)), '[]'::json)::text AS rows FROM ({sql}) t"
        );

        let result: JsonRows = diesel::sql_query(wrapped)
            .get_result(conn)
            .map_err(|e| e.to_string())?;

        let parsed: Value =
            serde_json::from_str(&result.rows).map_err(|e| format!("invalid row JSON: {e}"))?;
        let objects = parsed
            .as_array()
            .ok_or_else(|| "row JSON is not an array".to_string())?;

        Ok(objects
            .iter()
            .map(|row| match row {
                Value::Object(map) => map.values().cloned().collect(),
                other => vec![other.clone()],
            })
            .collect())
    }

    fn execute_blocking(
        conn: &mut PgPooled,
        sql: &str,
        timeout_seconds: u64,
    ) -> Result<Vec<Vec<Value>>, String> {
        diesel::sql_query(format!("SET statement_timeout = {}", timeout_seconds * 1000))
            .execute(conn)
            .map_err(|e| e.to_string())?;

        Self::query_json_rows(conn, sql)
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl QueryExecutor for PostgresExecutor {
    async fn introspect(
        &self,
        database_id: &str,
    ) -> Result<(DatabaseInfo, DatabaseStats), WorkflowError> {
        let pool = self
            .pool_for(database_id)
            .map_err(WorkflowError::DatabaseNotFound)?;

        let info = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| format!("connection checkout failed: {e}"))?;
            Self::introspect_blocking(&mut conn).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| WorkflowError::IntrospectionFailed(e.to_string()))?
        .map_err(WorkflowError::IntrospectionFailed)?;

        debug!(
            "Introspected {} with {} tables",
            database_id,
            info.tables.len()
        );

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

        let pool = match self.pool_for(database_id) {
            Ok(pool) => pool,
            Err(e) => {
                return SqlExecutionResult::failure(sql, &e, "ConnectionError", 0.0);
            }
        };

        let sql_owned = sql.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| format!("connection checkout failed: {e}"))?;
            Self::execute_blocking(&mut conn, &sql_owned, timeout_seconds)
        });

        match tokio::time::timeout(Duration::from_secs(timeout_seconds), task).await {
            Ok(Ok(Ok(rows))) => SqlExecutionResult::success(sql, rows, start.elapsed().as_secs_f64()),
            Ok(Ok(Err(e))) => {
                SqlExecutionResult::failure(sql, &e, "QueryError", start.elapsed().as_secs_f64())
            }
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
