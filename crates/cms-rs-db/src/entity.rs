//! The entity service.
//!
//! [`EntityService`] is the programmatic entry point of the engine: it turns
//! request-shaped [`QueryParams`] into builders, runs them through a
//! [`DbExecutor`], and returns decoded, populated [`Record`]s.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use cms_rs_core::QuerySettings;
//! # use cms_rs_db::{EntityService, MetadataRegistry, QueryParams, DbExecutor};
//! # async fn demo(executor: &dyn DbExecutor, registry: MetadataRegistry) -> cms_rs_core::CmsResult<()> {
//! let service = EntityService::new(Arc::new(registry), QuerySettings::default());
//! let page = service
//!     .find_page(executor, "api::product.product", QueryParams::new().page(2))
//!     .await?;
//! println!("{} of {}", page.results.len(), page.pagination.total);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use cms_rs_core::logging::query_span;
use cms_rs_core::{CmsError, CmsResult, QuerySettings, SETTINGS};
use serde::Serialize;
use tracing::Instrument;

use crate::executor::DbExecutor;
use crate::metadata::{Attribute, Linkage, MetadataRegistry};
use crate::query::builder::{QueryBuilder, QueryParams};
use crate::query::join::join_pivot_from_target;
use crate::query::row::Record;
use crate::value::Value;

/// Pagination metadata of a [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: u64,
    /// Page size.
    pub page_size: u64,
    /// Number of pages (`ceil(total / page_size)`).
    pub page_count: u64,
    /// Total number of matching rows.
    pub total: u64,
}

impl Pagination {
    fn new(page: u64, page_size: u64, total: u64) -> Self {
        Self {
            page,
            page_size,
            page_count: total.div_ceil(page_size),
            total,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// The rows of this page.
    pub results: Vec<T>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

impl Page<Record> {
    /// Renders the page as `{ "results": [...], "pagination": {...} }`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "results": self.results.iter().map(Record::to_json).collect::<Vec<_>>(),
            "pagination": self.pagination,
        })
    }
}

/// Entity-level queries over a metadata registry.
#[derive(Debug, Clone)]
pub struct EntityService {
    registry: Arc<MetadataRegistry>,
    settings: QuerySettings,
}

impl EntityService {
    /// Creates a service.
    pub fn new(registry: Arc<MetadataRegistry>, settings: QuerySettings) -> Self {
        Self { registry, settings }
    }

    /// Creates a service using the query settings of the global
    /// [`SETTINGS`], or the defaults when they are not configured.
    pub fn from_global_settings(registry: Arc<MetadataRegistry>) -> Self {
        let settings = SETTINGS
            .try_get()
            .map(|s| s.query)
            .unwrap_or_default();
        Self::new(registry, settings)
    }

    /// The metadata registry.
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// The query settings.
    pub const fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Builds and validates a query without running it.
    ///
    /// Queries that join are made DISTINCT so a root row matched through
    /// several related rows is returned once.
    ///
    /// # Errors
    ///
    /// Returns the query-shape error of the first invalid clause.
    pub fn query(&self, uid: &str, params: &QueryParams) -> CmsResult<QueryBuilder> {
        let mut qb = QueryBuilder::new(&self.registry, uid)?;
        qb.init(&self.registry, params)?;
        if !qb.joins().is_empty() {
            qb.distinct(true);
        }
        Ok(qb)
    }

    /// Returns every matching entity.
    ///
    /// # Errors
    ///
    /// Returns query-shape errors before any SQL runs, and executor errors.
    pub async fn find(
        &self,
        executor: &dyn DbExecutor,
        uid: &str,
        params: QueryParams,
    ) -> CmsResult<Vec<Record>> {
        async {
            let qb = self.query(uid, &params)?;
            qb.execute(executor, &self.registry).await
        }
        .instrument(query_span(uid, "find"))
        .await
    }

    /// Returns the first matching entity.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub async fn find_one(
        &self,
        executor: &dyn DbExecutor,
        uid: &str,
        params: QueryParams,
    ) -> CmsResult<Option<Record>> {
        async {
            let mut qb = self.query(uid, &params)?;
            qb.limit(1);
            Ok(qb.execute(executor, &self.registry).await?.into_iter().next())
        }
        .instrument(query_span(uid, "find_one"))
        .await
    }

    /// Counts matching entities. Pagination and populate are ignored.
    ///
    /// # Errors
    ///
    /// See [`find`](Self::find).
    pub async fn count(
        &self,
        executor: &dyn DbExecutor,
        uid: &str,
        params: QueryParams,
    ) -> CmsResult<i64> {
        async {
            let params = QueryParams {
                filters: params.filters,
                ..QueryParams::default()
            };
            self.query(uid, &params)?.count(executor).await
        }
        .instrument(query_span(uid, "count"))
        .await
    }

    /// Returns one page of matching entities with pagination metadata.
    ///
    /// The page defaults to 1 and the page size to the configured default,
    /// capped at the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidPagination`] when `limit`/`offset` are
    /// combined with paging, and the errors of [`find`](Self::find).
    pub async fn find_page(
        &self,
        executor: &dyn DbExecutor,
        uid: &str,
        params: QueryParams,
    ) -> CmsResult<Page<Record>> {
        async {
            let (params, page, page_size) = self.paged(params);
            let qb = self.query(uid, &params)?;
            self.run_page(executor, &qb, page, page_size).await
        }
        .instrument(query_span(uid, "find_page"))
        .await
    }

    /// Relation preview: one page of the entities linked to the parent `id`
    /// through the to-many relation `field`.
    ///
    /// `params` apply to the related model (filters, ordering, populate and
    /// pagination).
    ///
    /// # Errors
    ///
    /// - [`CmsError::UnknownAttribute`] if `field` does not exist;
    /// - [`CmsError::InvalidTargetField`] if `field` is not a to-many relation
    ///   with a join linkage;
    /// - [`CmsError::EntityNotFound`] if the parent does not exist;
    /// - the errors of [`find_page`](Self::find_page).
    pub async fn find_relation_page(
        &self,
        executor: &dyn DbExecutor,
        uid: &str,
        id: impl Into<Value> + Send,
        field: &str,
        params: QueryParams,
    ) -> CmsResult<Page<Record>> {
        let id = id.into();
        async {
            let meta = self.registry.get(uid)?;
            let relation = match meta.require_attribute(field)? {
                Attribute::Relation(relation) if relation.kind.is_to_many() => relation,
                other => {
                    return Err(CmsError::InvalidTargetField(format!(
                        "{field} is a {} attribute, expected a to-many relation",
                        describe(other)
                    )))
                }
            };

            let parent_column = match &relation.linkage {
                Linkage::JoinTable(jt) => jt.join_column.referenced_column.as_str(),
                Linkage::JoinColumn(jc) => jc.name.as_str(),
                Linkage::Unlinked => {
                    return Err(CmsError::InvalidTargetField(format!(
                        "{field} has no join linkage"
                    )))
                }
            };

            let mut parent = QueryBuilder::new(&self.registry, uid)?;
            parent.select([parent_column]).where_eq("id", id.clone()).limit(1);
            let parent_key = parent
                .fetch(executor)
                .await?
                .into_iter()
                .next()
                .and_then(|row| row.get_value(parent_column).cloned())
                .ok_or_else(|| CmsError::EntityNotFound(format!("{uid} with id {id}")))?;

            let (params, page, page_size) = self.paged(params);
            let mut qb = self.query(&relation.target, &params)?;
            if parent_key.is_null() {
                return Ok(Page {
                    results: Vec::new(),
                    pagination: Pagination::new(page, page_size, 0),
                });
            }
            match &relation.linkage {
                Linkage::JoinTable(jt) => {
                    let pivot = join_pivot_from_target(&mut qb, jt);
                    qb.where_eq(&format!("{pivot}.{}", jt.join_column.name), parent_key);
                    qb.distinct(true);
                }
                Linkage::JoinColumn(jc) => {
                    qb.where_eq(&jc.referenced_column, parent_key);
                }
                Linkage::Unlinked => {}
            }

            tracing::debug!(target_uid = %relation.target, field, "relation preview");
            self.run_page(executor, &qb, page, page_size).await
        }
        .instrument(query_span(uid, "find_relation_page"))
        .await
    }

    fn paged(&self, params: QueryParams) -> (QueryParams, u64, u64) {
        let page = params.page.unwrap_or(1);
        let page_size = params
            .page_size
            .unwrap_or(self.settings.default_page_size)
            .min(self.settings.max_page_size);
        let params = QueryParams {
            page: Some(page),
            page_size: Some(page_size),
            ..params
        };
        (params, page, page_size)
    }

    async fn run_page(
        &self,
        executor: &dyn DbExecutor,
        qb: &QueryBuilder,
        page: u64,
        page_size: u64,
    ) -> CmsResult<Page<Record>> {
        let results = qb.execute(executor, &self.registry).await?;
        let total = qb.count(executor).await?;
        let total = u64::try_from(total).unwrap_or(0);
        Ok(Page {
            results,
            pagination: Pagination::new(page, page_size, total),
        })
    }
}

fn describe(attribute: &Attribute) -> &'static str {
    match attribute {
        Attribute::Relation(relation) if relation.kind.is_to_one() => "to-one relation",
        other => other.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_page_count() {
        assert_eq!(Pagination::new(1, 10, 0).page_count, 0);
        assert_eq!(Pagination::new(1, 10, 10).page_count, 1);
        assert_eq!(Pagination::new(2, 10, 12).page_count, 2);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let json = serde_json::to_value(Pagination::new(2, 10, 12)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "page": 2, "pageSize": 10, "pageCount": 2, "total": 12 })
        );
    }

    #[test]
    fn test_paged_defaults_and_cap() {
        let service = EntityService::new(
            Arc::new(MetadataRegistry::new()),
            QuerySettings {
                default_page_size: 10,
                max_page_size: 25,
            },
        );
        let (params, page, size) = service.paged(QueryParams::new());
        assert_eq!((page, size), (1, 10));
        assert_eq!(params.page_size, Some(10));

        let (_, page, size) = service.paged(QueryParams::new().page(3).page_size(500));
        assert_eq!((page, size), (3, 25));
    }
}
