//! The query builder and the per-compile query context.
//!
//! A [`QueryBuilder`] accumulates the parts of one SELECT against a model:
//! select list, joins, WHERE conjuncts, ordering, grouping, pagination and
//! the normalized populate map. It is built up either through its primitives
//! or, for request-shaped input, through [`QueryBuilder::init`], which runs
//! the filter, order and populate compilers.
//!
//! Every builder owns a monotonic alias counter. The root table is always
//! aliased `t0`; [`QueryBuilder::get_alias`] hands out `t1`, `t2`, ... so two
//! joins on one builder never share an alias.

use std::future::Future;
use std::pin::Pin;

use cms_rs_core::{CmsError, CmsResult};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::executor::DbExecutor;
use crate::metadata::{Attribute, MetadataRegistry, ModelMetadata};
use crate::query::compiler::{is_column_reference, SqlCompiler};
use crate::query::filter::{apply_where, process_where};
use crate::query::lookups::{Lookup, WhereNode};
use crate::query::order::process_order_by;
use crate::query::populate::{apply_populate, process_populate, PopulateMap};
use crate::query::row::{from_rows, Record, Row};
use crate::value::Value;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A column in the SELECT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectColumn {
    /// Every column of the aliased table (`"t0".*`).
    Star(String),
    /// A qualified column, optionally renamed.
    Column {
        /// Qualified column (`alias.column`).
        column: String,
        /// Output name.
        alias: Option<String>,
    },
    /// A raw SQL expression, rendered verbatim.
    Raw(String),
}

/// The type of SQL join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
}

/// A join registered on a builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join type. Joins default to [`JoinType::Left`].
    pub join_type: JoinType,
    /// The alias of the joined table.
    pub alias: String,
    /// The joined table.
    pub referenced_table: String,
    /// Column on the joined table.
    pub referenced_column: String,
    /// Alias of the table being joined from.
    pub root_table: String,
    /// Column on the table being joined from.
    pub root_column: String,
    /// Extra `alias.key = value` conditions.
    pub on: Vec<(String, Value)>,
}

/// Ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Qualified column.
    pub column: String,
    /// Direction. `None` renders without a keyword (ascending).
    pub direction: Option<SortDirection>,
}

impl OrderBy {
    /// Creates an order entry.
    pub fn new(column: impl Into<String>, direction: Option<SortDirection>) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Request-shaped query parameters.
///
/// Deserializes from `{ "where", "orderBy", "populate", "select", "page",
/// "pageSize", "limit", "offset" }`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    /// Attribute name or list of names.
    pub select: Option<JsonValue>,
    /// The filter tree.
    #[serde(rename = "where")]
    pub filters: Option<JsonValue>,
    /// The order specification.
    pub order_by: Option<JsonValue>,
    /// The populate specification.
    pub populate: Option<JsonValue>,
    /// 1-based page number.
    pub page: Option<u64>,
    /// Page size.
    pub page_size: Option<u64>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
}

impl QueryParams {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses parameters from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::SerializationError`] for malformed documents.
    pub fn from_json(value: &JsonValue) -> CmsResult<Self> {
        Ok(Self::deserialize(value)?)
    }

    /// Sets the select list.
    pub fn select(mut self, select: JsonValue) -> Self {
        self.select = Some(select);
        self
    }

    /// Sets the filter tree.
    pub fn filters(mut self, filters: JsonValue) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Sets the order specification.
    pub fn order_by(mut self, order_by: JsonValue) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Sets the populate specification.
    pub fn populate(mut self, populate: JsonValue) -> Self {
        self.populate = Some(populate);
        self
    }

    /// Sets the page number.
    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Sets the page size.
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the row limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Per-compile context: the registry handle, the current model and the
/// alias its table is reachable under.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    /// The metadata registry.
    pub registry: &'a MetadataRegistry,
    /// Metadata of the current model.
    pub meta: &'a ModelMetadata,
    /// Alias of the current model's table.
    pub alias: String,
}

impl<'a> QueryContext<'a> {
    /// Creates a context for `uid` reachable under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] for unknown uids.
    pub fn new(registry: &'a MetadataRegistry, uid: &str, alias: impl Into<String>) -> CmsResult<Self> {
        Ok(Self {
            registry,
            meta: registry.get(uid)?,
            alias: alias.into(),
        })
    }

    /// The uid of the current model.
    pub fn uid(&self) -> &'a str {
        &self.meta.uid
    }

    /// Returns a context for a related model joined under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] for unknown uids.
    pub fn for_target(&self, uid: &str, alias: impl Into<String>) -> CmsResult<Self> {
        Self::new(self.registry, uid, alias)
    }

    /// Looks up an attribute on the current model.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::UnknownAttribute`] if the model has no such
    /// attribute.
    pub fn attribute(&self, name: &str) -> CmsResult<&'a Attribute> {
        self.meta.require_attribute(name)
    }
}

/// Builds one SELECT against a model.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub(crate) uid: String,
    pub(crate) table: String,
    pub(crate) alias: String,
    alias_counter: usize,
    pub(crate) select: Vec<SelectColumn>,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: Vec<WhereNode>,
    pub(crate) order_by: Vec<OrderBy>,
    pub(crate) group_by: Vec<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) distinct: bool,
    pub(crate) populate: Option<PopulateMap>,
}

impl QueryBuilder {
    /// Creates a builder for `uid` with the root table aliased `t0`.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] for unknown uids.
    pub fn new(registry: &MetadataRegistry, uid: &str) -> CmsResult<Self> {
        let meta = registry.get(uid)?;
        Ok(Self {
            uid: meta.uid.clone(),
            table: meta.table_name.clone(),
            alias: "t0".to_string(),
            alias_counter: 0,
            select: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            populate: None,
        })
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// The model uid.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The root table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The root alias (`t0`).
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The SELECT list. Empty means `"t0".*`.
    pub fn select_columns(&self) -> &[SelectColumn] {
        &self.select
    }

    /// The registered joins, in registration order.
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// The WHERE conjuncts.
    pub fn wheres(&self) -> &[WhereNode] {
        &self.wheres
    }

    /// The ORDER BY entries.
    pub fn orders(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// The GROUP BY columns.
    pub fn group_by_columns(&self) -> &[String] {
        &self.group_by
    }

    /// The row limit.
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// The row offset.
    pub const fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Whether SELECT DISTINCT is requested.
    pub const fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// The normalized populate map, if anything is populated.
    pub const fn populate_map(&self) -> Option<&PopulateMap> {
        self.populate.as_ref()
    }

    /// Allocates a fresh table alias (`t1`, `t2`, ...).
    pub fn get_alias(&mut self) -> String {
        self.alias_counter += 1;
        tracing::trace!(uid = %self.uid, alias = self.alias_counter, "allocated alias");
        format!("t{}", self.alias_counter)
    }

    /// Qualifies a bare column with the root alias. Names containing a `.`
    /// are returned unchanged.
    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{column}", self.alias)
        }
    }

    /// Builds a context for the root model.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] if the registry does not know the
    /// builder's model.
    pub fn context<'a>(&self, registry: &'a MetadataRegistry) -> CmsResult<QueryContext<'a>> {
        QueryContext::new(registry, &self.uid, self.alias.clone())
    }

    // ── Select ─────────────────────────────────────────────────────

    /// Replaces the SELECT list.
    pub fn select<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let select = columns
            .into_iter()
            .map(|c| SelectColumn::Column {
                column: self.qualify(c.as_ref()),
                alias: None,
            })
            .collect();
        self.select = select;
        self
    }

    /// Adds a column to the SELECT list. An empty list is first expanded to
    /// `"t0".*` so the added column does not narrow the selection.
    pub fn add_select(&mut self, column: &str) -> &mut Self {
        self.push_select(self.qualify(column), None)
    }

    /// Adds a column under an output name, keeping any implicit `"t0".*`.
    pub fn add_select_as(&mut self, column: &str, alias: &str) -> &mut Self {
        self.push_select(self.qualify(column), Some(alias.to_string()))
    }

    fn push_select(&mut self, column: String, alias: Option<String>) -> &mut Self {
        if self.select.is_empty() {
            self.select.push(SelectColumn::Star(self.alias.clone()));
        }
        let entry = SelectColumn::Column { column, alias };
        if !self.select.contains(&entry) {
            self.select.push(entry);
        }
        self
    }

    /// Makes sure a root column is part of the result. A no-op when every
    /// root column is already selected.
    pub fn ensure_selected(&mut self, column: &str) -> &mut Self {
        let star = SelectColumn::Star(self.alias.clone());
        if self.select.is_empty() || self.select.contains(&star) {
            return self;
        }
        self.push_select(self.qualify(column), None)
    }

    /// Adds a raw SQL expression to the SELECT list.
    pub fn select_raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.select.push(SelectColumn::Raw(sql.into()));
        self
    }

    /// Clears the SELECT list.
    pub fn clear_select(&mut self) -> &mut Self {
        self.select.clear();
        self
    }

    // ── Joins ──────────────────────────────────────────────────────

    /// Registers a join.
    pub fn join(&mut self, join: Join) -> &mut Self {
        self.joins.push(join);
        self
    }

    /// Registers a join as a LEFT JOIN, whatever its declared type.
    pub fn left_join(&mut self, join: Join) -> &mut Self {
        self.join(Join {
            join_type: JoinType::Left,
            ..join
        })
    }

    // ── Where ──────────────────────────────────────────────────────

    /// Adds a WHERE conjunct.
    pub fn and_where(&mut self, node: WhereNode) -> &mut Self {
        self.wheres.push(node);
        self
    }

    /// Adds `column = value`.
    pub fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(column, Lookup::Exact(value.into())))
    }

    /// Adds an OR group of conditions.
    pub fn or_where(&mut self, nodes: Vec<WhereNode>) -> &mut Self {
        self.and_where(WhereNode::Or(nodes))
    }

    /// Adds a negated condition.
    pub fn where_not(&mut self, node: WhereNode) -> &mut Self {
        self.and_where(WhereNode::Not(Box::new(node)))
    }

    /// Adds `column IN (values)`.
    pub fn where_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(column, Lookup::In(values)))
    }

    /// Adds `column NOT IN (values)`.
    pub fn where_not_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(column, Lookup::NotIn(values)))
    }

    /// Adds `column IS NULL`.
    pub fn where_null(&mut self, column: &str) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(column, Lookup::IsNull(true)))
    }

    /// Adds `column IS NOT NULL`.
    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(column, Lookup::IsNull(false)))
    }

    /// Adds `column BETWEEN low AND high`.
    pub fn where_between(
        &mut self,
        column: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        let column = self.qualify(column);
        self.and_where(WhereNode::condition(
            column,
            Lookup::Range(low.into(), high.into()),
        ))
    }

    // ── Grouping, ordering, pagination ─────────────────────────────

    /// Adds a GROUP BY column.
    pub fn group_by(&mut self, column: &str) -> &mut Self {
        let column = self.qualify(column);
        self.group_by.push(column);
        self
    }

    /// Adds an ORDER BY entry.
    pub fn order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    /// Removes every ORDER BY entry.
    pub fn clear_order(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    /// Sets the row limit.
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the DISTINCT flag.
    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    // ── Request parameters ─────────────────────────────────────────

    /// Applies request parameters: `select`, `where`, `orderBy`, `populate`,
    /// then pagination.
    ///
    /// Every clause is validated before any SQL runs; the first invalid
    /// clause aborts with its error.
    ///
    /// # Errors
    ///
    /// Returns the query-shape error of the first invalid clause.
    pub fn init(&mut self, registry: &MetadataRegistry, params: &QueryParams) -> CmsResult<&mut Self> {
        let ctx = self.context(registry)?;

        if let Some(select) = &params.select {
            let columns = select_columns(&ctx, select)?;
            self.select(columns);
        }

        if let Some(filters) = &params.filters {
            let compiled = process_where(filters, self, &ctx, 0)?;
            apply_where(self, &compiled)?;
        }

        if let Some(order_by) = &params.order_by {
            for order in process_order_by(order_by, self, &ctx)? {
                self.order_by(order);
            }
        }

        if let Some(populate) = &params.populate {
            self.populate = process_populate(populate, self, &ctx)?;
        }

        self.apply_pagination(params)?;
        Ok(self)
    }

    fn apply_pagination(&mut self, params: &QueryParams) -> CmsResult<()> {
        let paged = params.page.is_some() || params.page_size.is_some();
        if paged && (params.limit.is_some() || params.offset.is_some()) {
            return Err(CmsError::InvalidPagination(
                "page/pageSize cannot be combined with limit/offset".to_string(),
            ));
        }

        if paged {
            let page = params.page.unwrap_or(1);
            let page_size = params.page_size.ok_or_else(|| {
                CmsError::InvalidPagination("page requires pageSize".to_string())
            })?;
            if page < 1 {
                return Err(CmsError::InvalidPagination(format!(
                    "page must be at least 1, got {page}"
                )));
            }
            if page_size < 1 {
                return Err(CmsError::InvalidPagination(
                    "pageSize must be at least 1".to_string(),
                ));
            }
            let offset = (page - 1)
                .checked_mul(page_size)
                .filter(|offset| i64::try_from(*offset).is_ok())
                .ok_or_else(|| {
                    CmsError::InvalidPagination(format!(
                        "page {page} with pageSize {page_size} is out of range"
                    ))
                })?;
            self.limit(page_size);
            self.offset(offset);
        } else {
            if let Some(limit) = params.limit {
                self.limit(limit);
            }
            if let Some(offset) = params.offset {
                self.offset(offset);
            }
        }
        Ok(())
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Runs the SELECT and returns the raw rows.
    ///
    /// # Errors
    ///
    /// Propagates executor failures.
    pub async fn fetch(&self, executor: &dyn DbExecutor) -> CmsResult<Vec<Row>> {
        let (sql, params) = SqlCompiler::new(executor.backend_type()).compile_select(self);
        tracing::debug!(uid = %self.uid, sql = %sql, params = params.len(), "select");
        executor.query(&sql, &params).await
    }

    /// Decodes rows fetched by this builder and applies its populate map.
    pub fn hydrate<'a>(
        &'a self,
        executor: &'a dyn DbExecutor,
        registry: &'a MetadataRegistry,
        rows: &'a [Row],
    ) -> BoxFuture<'a, CmsResult<Vec<Record>>> {
        Box::pin(async move {
            match &self.populate {
                Some(populate) => {
                    apply_populate(executor, registry, &self.uid, rows, populate).await
                }
                None => from_rows(registry.get(&self.uid)?, rows),
            }
        })
    }

    /// Runs the SELECT, then decodes and populates the results.
    ///
    /// # Errors
    ///
    /// Propagates executor failures and decoding errors.
    pub async fn execute(
        &self,
        executor: &dyn DbExecutor,
        registry: &MetadataRegistry,
    ) -> CmsResult<Vec<Record>> {
        let rows = self.fetch(executor).await?;
        self.hydrate(executor, registry, &rows).await
    }

    /// Counts the distinct root rows matching the builder's joins and WHERE
    /// clause. Ordering, grouping and pagination are ignored.
    ///
    /// # Errors
    ///
    /// Propagates executor failures.
    pub async fn count(&self, executor: &dyn DbExecutor) -> CmsResult<i64> {
        let (sql, params) = SqlCompiler::new(executor.backend_type()).compile_count(self);
        tracing::debug!(uid = %self.uid, sql = %sql, params = params.len(), "count");
        let row = executor.query_one(&sql, &params).await?;
        row.get::<i64>("count")
    }
}

fn select_columns(ctx: &QueryContext<'_>, select: &JsonValue) -> CmsResult<Vec<String>> {
    let names: Vec<&str> = match select {
        JsonValue::String(s) => vec![s.as_str()],
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    CmsError::InvalidValue(format!("select entries must be strings, got {item}"))
                })
            })
            .collect::<CmsResult<_>>()?,
        other => {
            return Err(CmsError::InvalidValue(format!(
                "select must be a string or a list, got {other}"
            )))
        }
    };

    names
        .into_iter()
        .map(|name| {
            if name.contains('.') {
                if !is_column_reference(name) {
                    return Err(CmsError::InvalidValue(format!(
                        "{name:?} is not a column reference"
                    )));
                }
                return Ok(name.to_string());
            }
            match ctx.attribute(name)? {
                Attribute::Scalar(_) => Ok(name.to_string()),
                other => Err(CmsError::InvalidValue(format!(
                    "cannot select {} attribute {name}",
                    other.type_name()
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{JoinColumn, RelationAttribute, RelationKind};
    use crate::types::ScalarType;
    use serde_json::json;

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.register(
            ModelMetadata::new("api::category.category", "categories")
                .attribute("name", Attribute::scalar(ScalarType::String)),
        );
        registry.register(
            ModelMetadata::new("api::product.product", "products")
                .attribute("name", Attribute::scalar(ScalarType::String))
                .attribute("price", Attribute::scalar(ScalarType::Float))
                .attribute(
                    "category",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
                        .join_column(JoinColumn::new("category_id", "id"))
                        .owner(),
                ),
        );
        registry
    }

    #[test]
    fn test_new_unknown_model() {
        assert!(matches!(
            QueryBuilder::new(&registry(), "api::nope.nope"),
            Err(CmsError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_aliases_are_monotonic_per_builder() {
        let registry = registry();
        let mut a = QueryBuilder::new(&registry, "api::product.product").unwrap();
        let mut b = QueryBuilder::new(&registry, "api::product.product").unwrap();
        assert_eq!(a.alias(), "t0");
        assert_eq!(a.get_alias(), "t1");
        assert_eq!(a.get_alias(), "t2");
        assert_eq!(b.get_alias(), "t1");
    }

    #[test]
    fn test_qualify() {
        let qb = QueryBuilder::new(&registry(), "api::product.product").unwrap();
        assert_eq!(qb.qualify("name"), "t0.name");
        assert_eq!(qb.qualify("t3.name"), "t3.name");
    }

    #[test]
    fn test_add_select_keeps_star() {
        let mut qb = QueryBuilder::new(&registry(), "api::product.product").unwrap();
        qb.add_select_as("t1.product_id", "__pivot_key");
        assert_eq!(
            qb.select_columns(),
            &[
                SelectColumn::Star("t0".into()),
                SelectColumn::Column {
                    column: "t1.product_id".into(),
                    alias: Some("__pivot_key".into())
                }
            ]
        );
    }

    #[test]
    fn test_ensure_selected() {
        let mut qb = QueryBuilder::new(&registry(), "api::product.product").unwrap();
        qb.ensure_selected("id");
        assert!(qb.select_columns().is_empty());

        qb.select(["name"]);
        qb.ensure_selected("id");
        qb.ensure_selected("id");
        assert_eq!(qb.select_columns().len(), 2);
    }

    #[test]
    fn test_init_select_validates_attributes() {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        let err = qb
            .init(&registry, &QueryParams::new().select(json!(["name", "foobar"])))
            .unwrap_err();
        assert!(matches!(err, CmsError::UnknownAttribute { ref attribute, .. } if attribute == "foobar"));

        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        let err = qb
            .init(&registry, &QueryParams::new().select(json!("category")))
            .unwrap_err();
        assert!(matches!(err, CmsError::InvalidValue(_)));
    }

    #[test]
    fn test_init_select_rejects_malformed_column_references() {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        qb.init(&registry, &QueryParams::new().select(json!(["name", "t0.price"])))
            .unwrap();
        assert_eq!(qb.select_columns().len(), 2);

        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        let err = qb
            .init(
                &registry,
                &QueryParams::new().select(json!(["t0.name\" FROM products; --"])),
            )
            .unwrap_err();
        assert!(matches!(err, CmsError::InvalidValue(_)), "got {err:?}");
    }

    #[test]
    fn test_init_pagination() {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        qb.init(&registry, &QueryParams::new().page(3).page_size(20)).unwrap();
        assert_eq!(qb.limit_value(), Some(20));
        assert_eq!(qb.offset_value(), Some(40));

        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        qb.init(&registry, &QueryParams::new().limit(5).offset(10)).unwrap();
        assert_eq!(qb.limit_value(), Some(5));
        assert_eq!(qb.offset_value(), Some(10));
    }

    #[test]
    fn test_init_pagination_errors() {
        let registry = registry();
        for params in [
            QueryParams::new().page(0).page_size(10),
            QueryParams::new().page(1).page_size(0),
            QueryParams::new().page(2),
            QueryParams::new().page(1).page_size(10).limit(3),
            QueryParams::new().page(u64::MAX).page_size(10),
            QueryParams::new().page(3).page_size(u64::MAX / 2),
        ] {
            let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
            assert!(matches!(
                qb.init(&registry, &params),
                Err(CmsError::InvalidPagination(_))
            ));
        }
    }

    #[test]
    fn test_init_relation_filter_registers_join() {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        qb.init(
            &registry,
            &QueryParams::new()
                .filters(json!({ "category": { "name": "Tools" } }))
                .order_by(json!({ "price": "desc" })),
        )
        .unwrap();
        assert_eq!(qb.joins().len(), 1);
        assert_eq!(qb.joins()[0].alias, "t1");
        assert_eq!(qb.wheres().len(), 1);
        assert_eq!(
            qb.orders(),
            &[OrderBy::new("t0.price", Some(SortDirection::Desc))]
        );
    }

    #[test]
    fn test_query_params_from_json() {
        let params = QueryParams::from_json(&json!({
            "where": { "name": "x" },
            "orderBy": "name",
            "pageSize": 5,
            "page": 2
        }))
        .unwrap();
        assert_eq!(params.filters, Some(json!({ "name": "x" })));
        assert_eq!(params.order_by, Some(json!("name")));
        assert_eq!(params.page, Some(2));
        assert_eq!(params.page_size, Some(5));
        assert!(params.populate.is_none());
    }

    #[test]
    fn test_where_primitives_qualify() {
        let mut qb = QueryBuilder::new(&registry(), "api::product.product").unwrap();
        qb.where_eq("name", "a")
            .where_in("id", vec![Value::Int(1)])
            .where_null("t1.x")
            .where_between("price", 1, 5);
        let columns: Vec<&str> = qb
            .wheres()
            .iter()
            .filter_map(|w| match w {
                WhereNode::Condition { column, .. } => Some(column.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(columns, vec!["t0.name", "t0.id", "t1.x", "t0.price"]);
    }

    #[test]
    fn test_left_join_overrides_type() {
        let mut qb = QueryBuilder::new(&registry(), "api::product.product").unwrap();
        let alias = qb.get_alias();
        qb.left_join(Join {
            join_type: JoinType::Inner,
            alias,
            referenced_table: "categories".into(),
            referenced_column: "id".into(),
            root_table: "t0".into(),
            root_column: "category_id".into(),
            on: Vec::new(),
        });
        assert_eq!(qb.joins()[0].join_type, JoinType::Left);
    }
}
