//! Database executor trait.
//!
//! This module defines the [`DbExecutor`] trait, the minimal async interface
//! the query layer needs to run SQL. It is the bridge between the query
//! engine (`cms-rs-db`) and the concrete database backends
//! (`cms-rs-db-backends`): builders, the populate engine and the entity
//! service accept `&dyn DbExecutor`, which backends implement.

use cms_rs_core::{CmsError, CmsResult};

use crate::query::compiler::DatabaseBackendType;
use crate::query::row::Row;
use crate::value::Value;

/// Minimal async database executor trait.
///
/// The trait lives in this crate so that query execution can be defined
/// without a dependency on any backend.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Returns the backend type for SQL compilation.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a SQL statement that does not return rows.
    /// Returns the number of rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> CmsResult<u64>;

    /// Runs a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> CmsResult<Vec<Row>>;

    /// Runs a SQL query and returns its first row.
    ///
    /// Returns [`CmsError::EntityNotFound`] if the query yields no rows.
    async fn query_one(&self, sql: &str, params: &[Value]) -> CmsResult<Row> {
        self.query(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CmsError::EntityNotFound("query returned no rows".to_string()))
    }
}
