//! # cms-rs-test
//!
//! Testing utilities for cms-rs. Provides an in-memory database that counts
//! and records the SQL it runs, a small sample catalog (products, shops and
//! categories) with seeding helpers, and query-count assertions for catching
//! N+1 populate regressions.

pub mod assert_queries;
pub mod catalog;
pub mod test_database;

pub use assert_queries::{assert_max_queries, assert_num_queries};
pub use test_database::TestDatabase;
