//! SQL compiler.
//!
//! [`SqlCompiler`] renders a [`QueryBuilder`] into a parameterized SELECT
//! (or a COUNT over the same joins and WHERE clause). Values never appear in
//! the SQL text; they are returned alongside it in placeholder order. The
//! compiler supports PostgreSQL (`$1, $2, ...`) and SQLite/MySQL (`?`)
//! placeholder styles.

use crate::query::builder::{Join, JoinType, OrderBy, QueryBuilder, SelectColumn, SortDirection};
use crate::query::lookups::{Lookup, WhereNode};
use crate::value::Value;

/// The type of database backend, used by the compiler to generate
/// backend-specific SQL syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
    /// MySQL (uses `?` placeholders).
    MySQL,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// Compiles query builders into SQL for a specific backend.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    /// Creates a new compiler for the given backend type.
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    /// Returns a parameter placeholder for the given 1-based index.
    fn placeholder(&self, index: usize) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${index}"),
            DatabaseBackendType::SQLite | DatabaseBackendType::MySQL => "?".to_string(),
        }
    }

    fn bind(&self, value: &Value, params: &mut Vec<Value>) -> String {
        params.push(value.clone());
        self.placeholder(params.len())
    }

    /// Compiles the builder into a SELECT statement and its parameters.
    pub fn compile_select(&self, qb: &QueryBuilder) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = Vec::new();
        let mut sql = String::from("SELECT ");

        if qb.is_distinct() {
            sql.push_str("DISTINCT ");
        }

        let select_parts: Vec<String> = if qb.select_columns().is_empty() {
            vec![format!("{}.*", quote_column(qb.alias()))]
        } else {
            qb.select_columns()
                .iter()
                .map(|col| match col {
                    SelectColumn::Star(alias) => format!("{}.*", quote_column(alias)),
                    SelectColumn::Column {
                        column,
                        alias: None,
                    } => quote_column(column),
                    SelectColumn::Column {
                        column,
                        alias: Some(alias),
                    } => format!("{} AS {}", quote_column(column), quote_ident(alias)),
                    SelectColumn::Raw(raw) => raw.clone(),
                })
                .collect()
        };
        sql.push_str(&select_parts.join(", "));

        self.compile_from(qb, &mut sql, &mut params);

        if !qb.group_by_columns().is_empty() {
            let cols: Vec<String> = qb.group_by_columns().iter().map(|c| quote_column(c)).collect();
            sql.push_str(&format!(" GROUP BY {}", cols.join(", ")));
        }

        if !qb.orders().is_empty() {
            let orders: Vec<String> = qb.orders().iter().map(compile_order).collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        match (qb.limit_value(), qb.offset_value()) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            (None, Some(offset)) => match self.backend {
                DatabaseBackendType::PostgreSQL => sql.push_str(&format!(" OFFSET {offset}")),
                DatabaseBackendType::SQLite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
                DatabaseBackendType::MySQL => {
                    sql.push_str(&format!(" LIMIT {} OFFSET {offset}", u64::MAX));
                }
            },
            (None, None) => {}
        }

        (sql, params)
    }

    /// Compiles a count of the distinct root rows matching the builder's
    /// joins and WHERE clause. The result column is named `count`.
    pub fn compile_count(&self, qb: &QueryBuilder) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = Vec::new();
        let mut sql = format!(
            "SELECT COUNT(DISTINCT {}) AS \"count\"",
            quote_column(&format!("{}.id", qb.alias()))
        );
        self.compile_from(qb, &mut sql, &mut params);
        (sql, params)
    }

    fn compile_from(&self, qb: &QueryBuilder, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str(&format!(
            " FROM {} AS {}",
            quote_ident(qb.table()),
            quote_ident(qb.alias())
        ));

        for join in qb.joins() {
            self.compile_join(join, sql, params);
        }

        match qb.wheres() {
            [] => {}
            [single] => {
                sql.push_str(" WHERE ");
                self.compile_where_node(single, sql, params);
            }
            many => {
                sql.push_str(" WHERE ");
                for (i, node) in many.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    self.compile_where_node(node, sql, params);
                }
            }
        }
    }

    fn compile_join(&self, join: &Join, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str(&format!(
            " {} {} AS {} ON {}.{} = {}.{}",
            join.join_type.sql_keyword(),
            quote_ident(&join.referenced_table),
            quote_ident(&join.alias),
            quote_ident(&join.root_table),
            quote_ident(&join.root_column),
            quote_ident(&join.alias),
            quote_ident(&join.referenced_column),
        ));
        for (column, value) in &join.on {
            let ph = self.bind(value, params);
            sql.push_str(&format!(
                " AND {}.{} = {ph}",
                quote_ident(&join.alias),
                quote_ident(column)
            ));
        }
    }

    /// Compiles a `WhereNode` into SQL, appending to the provided string.
    fn compile_where_node(&self, node: &WhereNode, sql: &mut String, params: &mut Vec<Value>) {
        match node {
            WhereNode::Condition { column, lookup } => {
                self.compile_lookup(column, lookup, sql, params);
            }
            WhereNode::And(children) => {
                if children.is_empty() {
                    sql.push_str("1=1");
                    return;
                }
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    self.compile_where_node(child, sql, params);
                }
                sql.push(')');
            }
            WhereNode::Or(children) => {
                if children.is_empty() {
                    sql.push_str("1=0");
                    return;
                }
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    self.compile_where_node(child, sql, params);
                }
                sql.push(')');
            }
            WhereNode::Not(inner) => {
                sql.push_str("NOT (");
                self.compile_where_node(inner, sql, params);
                sql.push(')');
            }
        }
    }

    /// Compiles a single lookup into SQL.
    fn compile_lookup(&self, column: &str, lookup: &Lookup, sql: &mut String, params: &mut Vec<Value>) {
        let col = quote_column(column);
        match lookup {
            Lookup::Exact(val) if val.is_null() => sql.push_str(&format!("{col} IS NULL")),
            Lookup::Exact(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} = {ph}"));
            }
            Lookup::NotEqual(val) if val.is_null() => sql.push_str(&format!("{col} IS NOT NULL")),
            Lookup::NotEqual(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} <> {ph}"));
            }
            Lookup::In(vals) | Lookup::NotIn(vals) if vals.is_empty() => {
                sql.push_str(if matches!(lookup, Lookup::In(_)) { "1=0" } else { "1=1" });
            }
            Lookup::In(vals) | Lookup::NotIn(vals) => {
                let placeholders: Vec<String> = vals.iter().map(|v| self.bind(v, params)).collect();
                let keyword = if matches!(lookup, Lookup::In(_)) { "IN" } else { "NOT IN" };
                sql.push_str(&format!("{col} {keyword} ({})", placeholders.join(", ")));
            }
            Lookup::Gt(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} > {ph}"));
            }
            Lookup::Gte(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} >= {ph}"));
            }
            Lookup::Lt(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} < {ph}"));
            }
            Lookup::Lte(val) => {
                let ph = self.bind(val, params);
                sql.push_str(&format!("{col} <= {ph}"));
            }
            Lookup::StartsWith(val) => {
                let ph = self.bind(&Value::String(format!("{val}%")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::EndsWith(val) => {
                let ph = self.bind(&Value::String(format!("%{val}")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::Contains(val) => {
                let ph = self.bind(&Value::String(format!("%{val}%")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::NotContains(val) => {
                let ph = self.bind(&Value::String(format!("%{val}%")), params);
                sql.push_str(&format!("{col} NOT LIKE {ph}"));
            }
            Lookup::Range(low, high) => {
                let ph_low = self.bind(low, params);
                let ph_high = self.bind(high, params);
                sql.push_str(&format!("{col} BETWEEN {ph_low} AND {ph_high}"));
            }
            Lookup::IsNull(true) => sql.push_str(&format!("{col} IS NULL")),
            Lookup::IsNull(false) => sql.push_str(&format!("{col} IS NOT NULL")),
        }
    }
}

/// Quotes a single identifier, doubling any embedded `"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a possibly qualified column: `t0.name` becomes `"t0"."name"`.
pub fn quote_column(column: &str) -> String {
    column
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Returns `true` for a plain column name or an `alias.column` pair made of
/// ASCII letters, digits and underscores.
///
/// Names taken from a request that do not resolve to a known attribute must
/// pass this check before they reach the SQL text.
pub fn is_column_reference(name: &str) -> bool {
    let is_ident =
        |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    match name.split_once('.') {
        None => is_ident(name),
        Some((alias, column)) => is_ident(alias) && is_ident(column),
    }
}

fn compile_order(order: &OrderBy) -> String {
    let col = quote_column(&order.column);
    match order.direction {
        None => col,
        Some(SortDirection::Asc) => format!("{col} ASC"),
        Some(SortDirection::Desc) => format!("{col} DESC"),
    }
}
