//! Query counting assertions for database tests.
//!
//! [`assert_num_queries`] counts the SQL statements executed during an async
//! closure and asserts that the count matches an expected value. Populate is
//! meant to cost one follow-up query per relation regardless of how many
//! parents were fetched; these assertions keep it that way.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cms_rs_core::QuerySettings;
//! use cms_rs_db::{EntityService, QueryParams};
//! use cms_rs_test::{assert_num_queries, catalog, TestDatabase};
//!
//! async fn example() {
//!     let db = TestDatabase::new();
//!     catalog::seed(&db).await.unwrap();
//!     let service = EntityService::new(Arc::new(catalog::registry()), QuerySettings::default());
//!
//!     assert_num_queries(&db, 2, || async {
//!         service
//!             .find(&db, catalog::PRODUCT, QueryParams::new().populate("shops".into()))
//!             .await
//!             .unwrap();
//!     })
//!     .await;
//! }
//! ```

use std::future::Future;

use crate::test_database::TestDatabase;

/// Asserts that exactly `expected_count` SQL queries are executed during the
/// async closure.
///
/// Resets the query counter on the [`TestDatabase`] before executing the
/// closure, then checks the counter after execution. The failure message
/// lists the executed statements.
///
/// # Panics
///
/// Panics if the number of queries does not match `expected_count`.
pub async fn assert_num_queries<F, Fut>(db: &TestDatabase, expected_count: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    db.reset_query_count();
    f().await;
    let actual = db.query_count();
    assert_eq!(
        actual,
        expected_count,
        "Expected {expected_count} SQL queries, but {actual} were executed:\n{}",
        db.executed_sql().join("\n")
    );
}

/// Asserts that at most `max_count` SQL queries are executed during the async
/// closure.
///
/// # Panics
///
/// Panics if more than `max_count` queries are executed.
pub async fn assert_max_queries<F, Fut>(db: &TestDatabase, max_count: usize, f: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    db.reset_query_count();
    f().await;
    let actual = db.query_count();
    assert!(
        actual <= max_count,
        "Expected at most {max_count} SQL queries, but {actual} were executed:\n{}",
        db.executed_sql().join("\n")
    );
}
