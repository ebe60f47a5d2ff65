//! The populate engine.
//!
//! [`process_populate`] normalizes and validates a populate request while the
//! parent query is being built. [`apply_populate`] runs after the parent page
//! has been fetched: for every populated relation it issues exactly one
//! follow-up query, batched over the distinct parent keys of the page, and
//! returns new records with the relation attached.

use std::collections::HashMap;

use cms_rs_core::{CmsError, CmsResult};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::executor::DbExecutor;
use crate::metadata::{Attribute, JoinColumn, JoinTable, Linkage, MetadataRegistry, ModelMetadata};
use crate::query::builder::{QueryBuilder, QueryContext, QueryParams, SelectColumn};
use crate::query::join::join_pivot_from_target;
use crate::query::row::{from_rows, Field, Record, Row};
use crate::value::Value;

/// Output name of the parent-key column selected by follow-up queries.
pub const PIVOT_KEY: &str = "__pivot_key";

/// Options for one populated relation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PopulateOptions {
    /// Select list for the related rows.
    pub select: Option<JsonValue>,
    /// Filter on the related rows.
    #[serde(rename = "where")]
    pub filters: Option<JsonValue>,
    /// Ordering of the related rows.
    pub order_by: Option<JsonValue>,
    /// Nested populate.
    pub populate: Option<JsonValue>,
    /// Attach `{count}` instead of the related rows.
    pub count: bool,
}

impl PopulateOptions {
    /// The options as query parameters for the follow-up builder.
    ///
    /// Pagination is never forwarded: one follow-up query serves the whole
    /// parent page.
    pub fn to_params(&self) -> QueryParams {
        QueryParams {
            select: self.select.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            populate: self.populate.clone(),
            ..QueryParams::default()
        }
    }

    fn push_nested(&mut self, path: &str) {
        match &mut self.populate {
            Some(JsonValue::Array(paths)) => paths.push(JsonValue::from(path)),
            _ => self.populate = Some(JsonValue::Array(vec![JsonValue::from(path)])),
        }
    }
}

/// The normalized populate request: relation names and their options, in
/// request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulateMap {
    entries: Vec<(String, PopulateOptions)>,
}

impl PopulateMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the options of a relation.
    pub fn get(&self, key: &str) -> Option<&PopulateOptions> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    fn get_mut_or_default(&mut self, key: &str) -> &mut PopulateOptions {
        let index = match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_string(), PopulateOptions::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    /// Inserts a relation, replacing previous options.
    pub fn insert(&mut self, key: impl Into<String>, options: PopulateOptions) {
        let key = key.into();
        *self.get_mut_or_default(&key) = options;
    }

    /// Iterates over `(relation, options)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PopulateOptions)> {
        self.entries.iter().map(|(k, o)| (k.as_str(), o))
    }

    /// Returns the number of populated relations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is populated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalizes and validates a populate request.
///
/// Accepted shapes:
/// - `false` / `null`: nothing;
/// - `true` / `"*"`: every relation of the model;
/// - `"a.b"` or `["a", "b.c"]`: dotted paths, split on the first `.` with the
///   remainder nested under the root segment;
/// - `{ "a": true, "b": { "where": ..., "count": true } }`.
///
/// When anything is populated, `id` and the parent-side key columns are
/// forced into the parent's select list.
///
/// # Errors
///
/// - [`CmsError::InvalidPopulate`] for malformed shapes and non-relation keys;
/// - [`CmsError::UnknownAttribute`] for unknown keys;
/// - any error raised while validating nested options.
pub fn process_populate(
    populate: &JsonValue,
    builder: &mut QueryBuilder,
    ctx: &QueryContext<'_>,
) -> CmsResult<Option<PopulateMap>> {
    let map = normalize(populate, ctx.meta)?;
    if map.is_empty() {
        return Ok(None);
    }

    for (key, options) in map.iter() {
        let attribute = ctx.attribute(key)?;
        let Attribute::Relation(relation) = attribute else {
            return Err(CmsError::InvalidPopulate(format!(
                "Invalid populate field. Expected a relation, got {}",
                attribute.type_name()
            )));
        };

        let mut nested = QueryBuilder::new(ctx.registry, &relation.target)?;
        nested.init(ctx.registry, &options.to_params())?;

        builder.ensure_selected("id");
        match &relation.linkage {
            Linkage::JoinColumn(jc) => {
                builder.ensure_selected(&jc.name);
            }
            Linkage::JoinTable(jt) => {
                builder.ensure_selected(&jt.join_column.referenced_column);
            }
            Linkage::Unlinked => {}
        }
    }

    Ok(Some(map))
}

fn normalize(populate: &JsonValue, meta: &ModelMetadata) -> CmsResult<PopulateMap> {
    let mut map = PopulateMap::new();
    match populate {
        JsonValue::Null | JsonValue::Bool(false) => {}
        JsonValue::Bool(true) => populate_all(&mut map, meta),
        JsonValue::String(s) if s == "*" => populate_all(&mut map, meta),
        JsonValue::String(path) => push_path(&mut map, path),
        JsonValue::Array(paths) => {
            for path in paths {
                let path = path.as_str().ok_or_else(|| {
                    CmsError::InvalidPopulate(format!("Populate paths must be strings, got {path}"))
                })?;
                push_path(&mut map, path);
            }
        }
        JsonValue::Object(entries) => {
            for (key, value) in entries {
                match value {
                    JsonValue::Bool(false) => {}
                    JsonValue::Bool(true) => map.insert(key.clone(), PopulateOptions::default()),
                    JsonValue::Object(_) => map.insert(
                        key.clone(),
                        PopulateOptions::deserialize(value).map_err(|e| {
                            CmsError::InvalidPopulate(format!("Invalid options for {key}: {e}"))
                        })?,
                    ),
                    other => {
                        return Err(CmsError::InvalidPopulate(format!(
                            "Populate value for {key} must be a boolean or an object, got {other}"
                        )))
                    }
                }
            }
        }
        other => {
            return Err(CmsError::InvalidPopulate(format!(
                "Populate must be an object, got {other}"
            )))
        }
    }
    Ok(map)
}

fn populate_all(map: &mut PopulateMap, meta: &ModelMetadata) {
    for (name, _) in meta.relations() {
        map.insert(name, PopulateOptions::default());
    }
}

fn push_path(map: &mut PopulateMap, path: &str) {
    match path.split_once('.') {
        Some((root, rest)) => map.get_mut_or_default(root).push_nested(rest),
        None => {
            map.get_mut_or_default(path);
        }
    }
}

/// Decodes a fetched parent page and attaches every populated relation.
///
/// Parents are never mutated: the returned records are built from `rows`.
/// Each relation costs at most one query; a page without parent keys costs
/// none. Relations without join linkage are skipped.
///
/// # Errors
///
/// Propagates metadata, validation and executor errors. A failing follow-up
/// query fails the whole call.
pub async fn apply_populate(
    executor: &dyn DbExecutor,
    registry: &MetadataRegistry,
    uid: &str,
    rows: &[Row],
    populate: &PopulateMap,
) -> CmsResult<Vec<Record>> {
    let meta = registry.get(uid)?;
    let mut records = from_rows(meta, rows)?;

    for (key, options) in populate.iter() {
        let Attribute::Relation(relation) = meta.require_attribute(key)? else {
            return Err(CmsError::InvalidPopulate(format!("{key} is not a relation")));
        };

        let (parent_column, (mut qb, key_column)) = match &relation.linkage {
            Linkage::JoinColumn(jc) => (
                jc.name.as_str(),
                follow_up_by_join_column(registry, &relation.target, jc, options)?,
            ),
            Linkage::JoinTable(jt) => (
                jt.join_column.referenced_column.as_str(),
                follow_up_by_join_table(registry, &relation.target, jt, options)?,
            ),
            Linkage::Unlinked => {
                tracing::warn!(uid, relation = key, "skipping populate of unlinked relation");
                continue;
            }
        };

        let parent_keys: Vec<Option<String>> = rows
            .iter()
            .map(|row| row.get_value(parent_column).and_then(Value::group_key))
            .collect();
        let keys = distinct_keys(rows, parent_column);

        let empty = || {
            if options.count {
                Field::Count(0)
            } else if relation.kind.is_to_one() {
                Field::One(None)
            } else {
                Field::Many(Vec::new())
            }
        };

        if keys.is_empty() {
            for record in &mut records {
                record.set(key, empty());
            }
            continue;
        }

        qb.where_in(&key_column, keys);

        tracing::debug!(
            uid,
            relation = key,
            target = %relation.target,
            parents = rows.len(),
            count = options.count,
            "populate"
        );

        if options.count {
            qb.populate = None;
            qb.select = vec![SelectColumn::Column {
                column: key_column.clone(),
                alias: Some(PIVOT_KEY.to_string()),
            }];
            qb.select_raw("COUNT(*) AS \"count\"");
            qb.group_by(&key_column);
            qb.clear_order();

            let mut counts: HashMap<String, i64> = HashMap::new();
            for row in qb.fetch(executor).await? {
                if let Some(group) = row.get_value(PIVOT_KEY).and_then(Value::group_key) {
                    counts.insert(group, row.get::<i64>("count")?);
                }
            }
            for (record, parent_key) in records.iter_mut().zip(&parent_keys) {
                let count = parent_key.as_ref().and_then(|k| counts.get(k)).copied();
                record.set(key, Field::Count(count.unwrap_or(0)));
            }
            continue;
        }

        let related_rows = qb.fetch(executor).await?;
        let related = qb.hydrate(executor, registry, &related_rows).await?;

        let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
        for (row, record) in related_rows.iter().zip(related) {
            if let Some(group) = row.get_value(PIVOT_KEY).and_then(Value::group_key) {
                groups.entry(group).or_default().push(record);
            }
        }

        for (record, parent_key) in records.iter_mut().zip(&parent_keys) {
            let matches = parent_key.as_ref().and_then(|k| groups.get(k));
            let field = match matches {
                None => empty(),
                Some(matches) if relation.kind.is_to_one() => {
                    Field::One(matches.first().cloned().map(Box::new))
                }
                Some(matches) => Field::Many(matches.clone()),
            };
            record.set(key, field);
        }
    }

    Ok(records)
}

fn distinct_keys(rows: &[Row], column: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|row| row.get_value(column))
        .filter(|value| value.group_key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

/// Target rows whose referenced column matches the parents' join column.
fn follow_up_by_join_column(
    registry: &MetadataRegistry,
    target: &str,
    join_column: &JoinColumn,
    options: &PopulateOptions,
) -> CmsResult<(QueryBuilder, String)> {
    let mut qb = QueryBuilder::new(registry, target)?;
    qb.init(registry, &options.to_params())?;
    let key_column = qb.qualify(&join_column.referenced_column);
    qb.add_select_as(&key_column, PIVOT_KEY);
    Ok((qb, key_column))
}

/// Target rows joined through the pivot, keyed by the pivot's parent column.
fn follow_up_by_join_table(
    registry: &MetadataRegistry,
    target: &str,
    join_table: &JoinTable,
    options: &PopulateOptions,
) -> CmsResult<(QueryBuilder, String)> {
    let mut qb = QueryBuilder::new(registry, target)?;
    qb.init(registry, &options.to_params())?;
    let pivot = join_pivot_from_target(&mut qb, join_table);
    let key_column = format!("{pivot}.{}", join_table.join_column.name);
    qb.add_select_as(&key_column, PIVOT_KEY);
    Ok((qb, key_column))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::metadata::{RelationAttribute, RelationKind};
    use crate::query::compiler::DatabaseBackendType;
    use crate::types::ScalarType;

    fn registry() -> MetadataRegistry {
        let mut registry = MetadataRegistry::new();
        registry.register(
            ModelMetadata::new("api::shop.shop", "shops")
                .attribute("name", Attribute::scalar(ScalarType::String)),
        );
        registry.register(
            ModelMetadata::new("api::category.category", "categories")
                .attribute("name", Attribute::scalar(ScalarType::String)),
        );
        registry.register(
            ModelMetadata::new("api::product.product", "products")
                .attribute("name", Attribute::scalar(ScalarType::String))
                .attribute(
                    "category",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
                        .join_column(JoinColumn::new("category_id", "id"))
                        .owner(),
                )
                .attribute(
                    "shops",
                    RelationAttribute::new(RelationKind::ManyToMany, "api::shop.shop").join_table(
                        JoinTable::new(
                            "products_shops_links",
                            JoinColumn::new("product_id", "id"),
                            JoinColumn::new("shop_id", "id"),
                        ),
                    ),
                )
                .attribute(
                    "morph",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::shop.shop"),
                ),
        );
        registry
    }

    fn process(populate: &JsonValue) -> CmsResult<(QueryBuilder, Option<PopulateMap>)> {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product")?;
        qb.select(["name"]);
        let ctx = qb.context(&registry)?;
        let map = process_populate(populate, &mut qb, &ctx)?;
        Ok((qb, map))
    }

    fn keys(map: &PopulateMap) -> Vec<&str> {
        map.iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_false_and_null_populate_nothing() {
        assert_eq!(process(&json!(false)).unwrap().1, None);
        assert_eq!(process(&JsonValue::Null).unwrap().1, None);
    }

    #[test]
    fn test_star_populates_every_relation() {
        let (_, map) = process(&json!("*")).unwrap();
        assert_eq!(keys(&map.unwrap()), vec!["category", "morph", "shops"]);
    }

    #[test]
    fn test_dotted_paths_merge() {
        let registry = {
            let mut r = registry();
            r.register(
                ModelMetadata::new("api::shop.shop", "shops")
                    .attribute("name", Attribute::scalar(ScalarType::String))
                    .attribute(
                        "owner",
                        RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
                            .join_column(JoinColumn::new("owner_id", "id")),
                    )
                    .attribute(
                        "region",
                        RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
                            .join_column(JoinColumn::new("region_id", "id")),
                    ),
            );
            r
        };
        let mut qb = QueryBuilder::new(&registry, "api::product.product").unwrap();
        let ctx = qb.context(&registry).unwrap();
        let map = process_populate(&json!(["shops.owner", "shops.region", "category"]), &mut qb, &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(keys(&map), vec!["shops", "category"]);
        assert_eq!(
            map.get("shops").unwrap().populate,
            Some(json!(["owner", "region"]))
        );
    }

    #[test]
    fn test_object_form_options() {
        let (_, map) = process(&json!({
            "shops": { "count": true, "where": { "name": "A" } },
            "category": true,
            "morph": false
        }))
        .unwrap();
        let map = map.unwrap();
        assert_eq!(keys(&map), vec!["shops", "category"]);
        let shops = map.get("shops").unwrap();
        assert!(shops.count);
        assert_eq!(shops.filters, Some(json!({ "name": "A" })));
    }

    #[test]
    fn test_forces_key_columns() {
        let (qb, _) = process(&json!(["category", "shops"])).unwrap();
        let columns: Vec<&str> = qb
            .select_columns()
            .iter()
            .filter_map(|c| match c {
                SelectColumn::Column { column, .. } => Some(column.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(columns, vec!["t0.name", "t0.id", "t0.category_id"]);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            process(&json!(["nope"])),
            Err(CmsError::UnknownAttribute { attribute, .. }) if attribute == "nope"
        ));
        assert!(matches!(
            process(&json!(["name"])),
            Err(CmsError::InvalidPopulate(_))
        ));
        assert!(matches!(process(&json!(3)), Err(CmsError::InvalidPopulate(_))));
        assert!(matches!(
            process(&json!({ "shops": "yes" })),
            Err(CmsError::InvalidPopulate(_))
        ));
    }

    #[test]
    fn test_nested_options_validated_eagerly() {
        assert!(matches!(
            process(&json!({ "shops": { "where": { "$gt": 1 } } })),
            Err(CmsError::InvalidFilter(_))
        ));
        assert!(matches!(
            process(&json!({ "shops": { "orderBy": "nope" } })),
            Err(CmsError::UnknownAttribute { .. })
        ));
    }

    /// Replays canned result sets and records every statement.
    struct ScriptedExecutor {
        results: Mutex<Vec<Vec<Row>>>,
        statements: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<Vec<Row>>) -> Self {
            Self {
                results: Mutex::new(results),
                statements: Mutex::new(Vec::new()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DbExecutor for ScriptedExecutor {
        fn backend_type(&self) -> DatabaseBackendType {
            DatabaseBackendType::SQLite
        }

        async fn execute_sql(&self, sql: &str, _params: &[Value]) -> CmsResult<u64> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(0)
        }

        async fn query(&self, sql: &str, _params: &[Value]) -> CmsResult<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            let mut results = self.results.lock().unwrap();
            Ok(if results.is_empty() { Vec::new() } else { results.remove(0) })
        }
    }

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        Row::new(columns.iter().map(|c| (*c).to_string()).collect(), values)
    }

    fn parents() -> Vec<Row> {
        vec![
            row(&["id", "name", "category_id"], vec![Value::Int(1), "a".into(), Value::Int(7)]),
            row(&["id", "name", "category_id"], vec![Value::Int(2), "b".into(), Value::Null]),
            row(&["id", "name", "category_id"], vec![Value::Int(3), "c".into(), Value::Int(7)]),
        ]
    }

    fn populate_map(populate: &JsonValue) -> PopulateMap {
        process(populate).unwrap().1.unwrap()
    }

    #[tokio::test]
    async fn test_to_many_join_table_single_query() {
        let registry = registry();
        let executor = ScriptedExecutor::new(vec![vec![
            row(&["id", "name", PIVOT_KEY], vec![Value::Int(10), "s1".into(), Value::Int(1)]),
            row(&["id", "name", PIVOT_KEY], vec![Value::Int(11), "s2".into(), Value::Int(1)]),
            row(&["id", "name", PIVOT_KEY], vec![Value::Int(10), "s1".into(), Value::Int(3)]),
        ]]);
        let records = apply_populate(
            &executor,
            &registry,
            "api::product.product",
            &parents(),
            &populate_map(&json!(["shops"])),
        )
        .await
        .unwrap();

        assert_eq!(executor.statements().len(), 1);
        let counts: Vec<usize> = records
            .iter()
            .map(|r| r.get("shops").unwrap().as_many().unwrap().len())
            .collect();
        assert_eq!(counts, vec![2, 0, 1]);
        assert_eq!(
            records[0].to_json()["shops"][1],
            json!({ "id": 11, "name": "s2" })
        );
    }

    #[tokio::test]
    async fn test_count_mode_defaults_to_zero() {
        let registry = registry();
        let executor = ScriptedExecutor::new(vec![vec![
            row(&[PIVOT_KEY, "count"], vec![Value::Int(1), Value::Int(4)]),
            row(&[PIVOT_KEY, "count"], vec![Value::Int(3), Value::Int(1)]),
        ]]);
        let records = apply_populate(
            &executor,
            &registry,
            "api::product.product",
            &parents(),
            &populate_map(&json!({ "shops": { "count": true } })),
        )
        .await
        .unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("GROUP BY"));
        let counts: Vec<Option<i64>> = records
            .iter()
            .map(|r| r.get("shops").and_then(Field::as_count))
            .collect();
        assert_eq!(counts, vec![Some(4), Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn test_to_one_join_column_shares_target() {
        let registry = registry();
        let executor = ScriptedExecutor::new(vec![vec![row(
            &["id", "name", PIVOT_KEY],
            vec![Value::Int(7), "Tools".into(), Value::Int(7)],
        )]]);
        let records = apply_populate(
            &executor,
            &registry,
            "api::product.product",
            &parents(),
            &populate_map(&json!(["category"])),
        )
        .await
        .unwrap();

        assert_eq!(executor.statements().len(), 1);
        assert_eq!(records[0].to_json()["category"], json!({ "id": 7, "name": "Tools" }));
        assert_eq!(records[1].to_json()["category"], JsonValue::Null);
        assert_eq!(records[2].to_json()["category"]["name"], json!("Tools"));
    }

    #[tokio::test]
    async fn test_no_parent_keys_skips_query() {
        let registry = registry();
        let executor = ScriptedExecutor::new(vec![]);
        let rows = vec![row(&["id", "category_id"], vec![Value::Int(1), Value::Null])];
        let records = apply_populate(
            &executor,
            &registry,
            "api::product.product",
            &rows,
            &populate_map(&json!(["category", "morph"])),
        )
        .await
        .unwrap();

        assert!(executor.statements().is_empty());
        assert_eq!(records[0].get("category"), Some(&Field::One(None)));
        assert_eq!(records[0].get("morph"), None);
    }
}
