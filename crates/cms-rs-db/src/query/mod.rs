//! Query building, compilation, and population.
//!
//! This module contains the complete query pipeline:
//!
//! - [`builder`] - The query builder, request parameters, and query context
//! - [`filter`] - The filter compiler (`where` trees)
//! - [`order`] - The order compiler (`orderBy` specifications)
//! - [`join`] - Join planning for relation traversals
//! - [`lookups`] - Column lookups and the WHERE tree
//! - [`compiler`] - SQL compilation
//! - [`populate`] - Relation population over fetched pages
//! - [`row`] - Raw rows and decoded records

pub mod builder;
pub mod compiler;
pub mod filter;
pub mod join;
pub mod lookups;
pub mod order;
pub mod populate;
pub mod row;

pub use builder::{
    BoxFuture, Join, JoinType, OrderBy, QueryBuilder, QueryContext, QueryParams, SelectColumn,
    SortDirection,
};
pub use compiler::{is_column_reference, quote_column, quote_ident, DatabaseBackendType, SqlCompiler};
pub use filter::{apply_where, process_where, CompiledFilter, Operator, Predicate};
pub use join::create_join;
pub use lookups::{Lookup, WhereNode};
pub use order::process_order_by;
pub use populate::{apply_populate, process_populate, PopulateMap, PopulateOptions};
pub use row::{from_optional_row, from_row, from_rows, Field, FromValue, Record, Row};
