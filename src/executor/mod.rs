use async_trait::async_trait;

use crate::errors::WorkflowError;
use crate::shared::models::{DatabaseInfo, DatabaseStats, SqlExecutionResult};

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresExecutor;
pub use sqlite::SqliteExecutor;

/// Engine-agnostic query interface. `execute` never raises: failures are
/// reported inside the result so the refiner can classify and repair them.
/// Implementations enforce the timeout themselves.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn introspect(
        &self,
        database_id: &str,
    ) -> Result<(DatabaseInfo, DatabaseStats), WorkflowError>;

    async fn execute(&self, database_id: &str, sql: &str, timeout_seconds: u64)
        -> SqlExecutionResult;
}
