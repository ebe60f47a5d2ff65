//! Test database utilities for cms-rs.
//!
//! Provides [`TestDatabase`], an in-memory SQLite database wrapper for use in
//! tests. It implements [`DbExecutor`] so it can be handed to builders and the
//! entity service, creates tables straight from a [`MetadataRegistry`], and
//! counts and records every statement it runs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cms_rs_test::test_database::TestDatabase;
//!
//! async fn example() {
//!     let db = TestDatabase::new();
//!     db.execute_raw("CREATE TABLE shops (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
//!         .await
//!         .unwrap();
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cms_rs_core::CmsResult;
use cms_rs_db::query::compiler::{quote_ident, DatabaseBackendType};
use cms_rs_db::{metadata_to_schema, DbExecutor, MetadataRegistry, Row, Value};
use cms_rs_db_backends::sqlite::SqliteBackend;

/// An in-memory SQLite database for testing.
///
/// Wraps a [`SqliteBackend`] with an `Arc` for sharing and adds a query
/// counter for use with [`assert_num_queries`](crate::assert_num_queries).
/// Clones share the connection, the counter and the statement log.
#[derive(Debug, Clone)]
pub struct TestDatabase {
    backend: Arc<SqliteBackend>,
    query_count: Arc<AtomicUsize>,
    statements: Arc<Mutex<Vec<String>>>,
}

impl TestDatabase {
    /// Creates a new in-memory SQLite test database.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory database cannot be created.
    pub fn new() -> Self {
        let backend = SqliteBackend::memory().expect("Failed to create in-memory SQLite database");
        Self {
            backend: Arc::new(backend),
            query_count: Arc::new(AtomicUsize::new(0)),
            statements: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates every model and pivot table described by `registry`.
    ///
    /// DDL statements go through the counter like any other statement; call
    /// [`reset_query_count`](Self::reset_query_count) afterwards when that
    /// matters.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be derived or a statement fails.
    pub async fn setup_schema(&self, registry: &MetadataRegistry) -> CmsResult<()> {
        let schema = metadata_to_schema(registry)?;
        for table in &schema.tables {
            for statement in table.to_sqlite_ddl() {
                self.execute_raw(&statement).await?;
            }
        }
        Ok(())
    }

    /// Drops all user-created tables in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub async fn teardown(&self) -> CmsResult<()> {
        let rows = self
            .backend
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                &[],
            )
            .await?;

        self.backend.execute_batch("PRAGMA foreign_keys=OFF;").await?;
        for row in &rows {
            let table_name: String = row.get("name")?;
            self.backend
                .execute_sql(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table_name)), &[])
                .await?;
        }
        self.backend.execute_batch("PRAGMA foreign_keys=ON;").await
    }

    /// Executes a raw SQL string with no parameters.
    ///
    /// Increments the query counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub async fn execute_raw(&self, sql: &str) -> CmsResult<u64> {
        self.record(sql);
        self.backend.execute_sql(sql, &[]).await
    }

    /// Inserts one row and returns its `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert(&self, table: &str, values: &[(&str, Value)]) -> CmsResult<i64> {
        let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING \"id\"",
            quote_ident(table),
            columns.join(", ")
        );
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        self.query_one(&sql, &params).await?.get::<i64>("id")
    }

    /// Returns the current query count.
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Resets the query counter to zero and clears the statement log.
    pub fn reset_query_count(&self) {
        self.query_count.store(0, Ordering::Relaxed);
        if let Ok(mut statements) = self.statements.lock() {
            statements.clear();
        }
    }

    /// Returns the statements executed since the last reset, oldest first.
    pub fn executed_sql(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|statements| statements.clone())
            .unwrap_or_default()
    }

    /// Returns a reference to the inner `SqliteBackend`.
    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    fn record(&self, sql: &str) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(sql.to_string());
        }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DbExecutor for TestDatabase {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> CmsResult<u64> {
        self.record(sql);
        self.backend.execute_sql(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> CmsResult<Vec<Row>> {
        self.record(sql);
        self.backend.query(sql, params).await
    }
}
