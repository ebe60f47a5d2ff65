//! The filter compiler.
//!
//! Request filters are JSON trees such as
//!
//! ```json
//! { "$or": [{ "name": { "$startsWith": "A" } }, { "category": { "name": "Tools" } }] }
//! ```
//!
//! [`process_where`] resolves attribute names against the model metadata,
//! plans joins for relation traversals and produces a typed
//! [`CompiledFilter`]. [`apply_where`] lowers the compiled tree into
//! [`WhereNode`]s on the builder. Invalid trees fail before any SQL is
//! produced.

use std::fmt;
use std::str::FromStr;

use cms_rs_core::{CmsError, CmsResult};
use serde_json::Value as JsonValue;

use crate::metadata::{Attribute, Linkage};
use crate::query::builder::{QueryBuilder, QueryContext};
use crate::query::compiler::is_column_reference;
use crate::query::join::create_join;
use crate::query::lookups::{Lookup, WhereNode};
use crate::value::Value;

/// A comparison operator usable on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `$not`
    Not,
    /// `$in`
    In,
    /// `$notIn`
    NotIn,
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$null`
    Null,
    /// `$notNull`
    NotNull,
    /// `$between`
    Between,
    /// `$startsWith`
    StartsWith,
    /// `$endsWith`
    EndsWith,
    /// `$contains`
    Contains,
    /// `$notContains`
    NotContains,
}

impl Operator {
    /// Every column operator.
    pub const ALL: [Self; 16] = [
        Self::Not,
        Self::In,
        Self::NotIn,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Null,
        Self::NotNull,
        Self::Between,
        Self::StartsWith,
        Self::EndsWith,
        Self::Contains,
        Self::NotContains,
    ];

    /// The request key of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Not => "$not",
            Self::In => "$in",
            Self::NotIn => "$notIn",
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Null => "$null",
            Self::NotNull => "$notNull",
            Self::Between => "$between",
            Self::StartsWith => "$startsWith",
            Self::EndsWith => "$endsWith",
            Self::Contains => "$contains",
            Self::NotContains => "$notContains",
        }
    }

    /// Operators that take a list operand as a whole. Any other operator
    /// given a list is expanded into an OR group, one branch per element.
    pub const fn is_array_operator(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::Between)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CmsError::UndefinedOperator(s.to_string()))
    }
}

/// The right-hand side of a column filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equality with a value (`IS NULL` for null).
    Value(Value),
    /// Membership in a list.
    List(Vec<Value>),
    /// A conjunction of operator applications.
    Operators(Vec<(Operator, Predicate)>),
}

/// A compiled, attribute-resolved filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledFilter {
    /// All children hold.
    And(Vec<CompiledFilter>),
    /// At least one child holds.
    Or(Vec<CompiledFilter>),
    /// The child does not hold.
    Not(Box<CompiledFilter>),
    /// A predicate on a qualified column.
    Column {
        /// The qualified column (`alias.column`).
        column: String,
        /// The predicate.
        predicate: Predicate,
    },
}

impl CompiledFilter {
    fn conjunction(mut conjuncts: Vec<Self>) -> Self {
        if conjuncts.len() == 1 {
            conjuncts.remove(0)
        } else {
            Self::And(conjuncts)
        }
    }
}

/// Compiles a filter tree against the model of `ctx`.
///
/// Keys are handled as follows:
/// - `$and` / `$or` take a list of sub-filters, `$not` a single sub-filter;
/// - any other operator key is rejected here, since it has no column;
/// - a relation attribute is joined; a non-mapping value (or a mapping whose
///   first key is an operator) filters the related `id`, anything else is a
///   nested filter on the target model, merged as a separate conjunct;
/// - a scalar attribute becomes a column predicate;
/// - an unknown key is passed through, qualified by the current alias
///   unless it already contains a `.`.
///
/// # Errors
///
/// - [`CmsError::InvalidFilter`] for non-mapping filters, misplaced operators
///   and malformed operands;
/// - [`CmsError::UndefinedOperator`] for unknown `$` keys;
/// - [`CmsError::UnsupportedFilterType`] for component, dynamic-zone and
///   media attributes.
pub fn process_where(
    filters: &JsonValue,
    builder: &mut QueryBuilder,
    ctx: &QueryContext<'_>,
    depth: usize,
) -> CmsResult<CompiledFilter> {
    let JsonValue::Object(map) = filters else {
        return Err(CmsError::InvalidFilter(format!(
            "Where must be an object, got {filters}"
        )));
    };

    let mut conjuncts = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" | "$or" => {
                let JsonValue::Array(items) = value else {
                    return Err(CmsError::InvalidFilter(format!("{key} must be an array")));
                };
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    children.push(process_where(item, builder, ctx, depth + 1)?);
                }
                conjuncts.push(if key == "$and" {
                    CompiledFilter::And(children)
                } else {
                    CompiledFilter::Or(children)
                });
            }
            "$not" => {
                let inner = process_where(value, builder, ctx, depth + 1)?;
                conjuncts.push(CompiledFilter::Not(Box::new(inner)));
            }
            op if op.starts_with('$') => {
                op.parse::<Operator>()?;
                return Err(CmsError::InvalidFilter(if depth == 0 {
                    format!("Only $and, $or and $not can be used as root level operators. Found {op}.")
                } else {
                    format!("Operator {op} must be applied to an attribute")
                }));
            }
            _ => conjuncts.push(process_attribute(key, value, builder, ctx, depth)?),
        }
    }

    Ok(CompiledFilter::conjunction(conjuncts))
}

fn process_attribute(
    key: &str,
    value: &JsonValue,
    builder: &mut QueryBuilder,
    ctx: &QueryContext<'_>,
    depth: usize,
) -> CmsResult<CompiledFilter> {
    match ctx.meta.attribute_def(key) {
        None => {
            if !is_column_reference(key) {
                return Err(CmsError::InvalidFilter(format!(
                    "{key:?} is neither an attribute nor a column name"
                )));
            }
            let column = if key.contains('.') {
                key.to_string()
            } else {
                format!("{}.{key}", ctx.alias)
            };
            Ok(CompiledFilter::Column {
                column,
                predicate: parse_predicate(value)?,
            })
        }
        Some(attribute @ Attribute::Relation(relation)) => {
            if relation.linkage == Linkage::Unlinked {
                return Err(CmsError::InvalidFilter(format!(
                    "relation {key} has no join linkage and cannot be filtered"
                )));
            }
            let sub_alias = create_join(builder, ctx, &ctx.alias, key, attribute)?;
            if is_id_predicate(value) {
                Ok(CompiledFilter::Column {
                    column: format!("{sub_alias}.id"),
                    predicate: parse_predicate(value)?,
                })
            } else {
                let target_ctx = ctx.for_target(&relation.target, sub_alias)?;
                process_where(value, builder, &target_ctx, depth + 1)
            }
        }
        Some(Attribute::Scalar(_)) => Ok(CompiledFilter::Column {
            column: format!("{}.{key}", ctx.alias),
            predicate: parse_predicate(value)?,
        }),
        Some(other) => Err(CmsError::UnsupportedFilterType(
            other.type_name().to_string(),
        )),
    }
}

fn is_id_predicate(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => map
            .keys()
            .next()
            .is_some_and(|k| k.parse::<Operator>().is_ok()),
        _ => true,
    }
}

fn parse_predicate(value: &JsonValue) -> CmsResult<Predicate> {
    match value {
        JsonValue::Object(map) => {
            let mut ops = Vec::with_capacity(map.len());
            for (key, operand) in map {
                let op: Operator = key.parse()?;
                let operand = if op == Operator::Not {
                    parse_predicate(operand)?
                } else {
                    parse_operand(op, operand)?
                };
                ops.push((op, operand));
            }
            Ok(Predicate::Operators(ops))
        }
        JsonValue::Array(items) => Ok(Predicate::List(items.iter().map(Value::from).collect())),
        scalar => Ok(Predicate::Value(Value::from(scalar))),
    }
}

fn parse_operand(op: Operator, operand: &JsonValue) -> CmsResult<Predicate> {
    match operand {
        JsonValue::Object(_) => Err(CmsError::InvalidFilter(format!(
            "{op} expects a value or a list, got {operand}"
        ))),
        JsonValue::Array(items) => Ok(Predicate::List(items.iter().map(Value::from).collect())),
        scalar => Ok(Predicate::Value(Value::from(scalar))),
    }
}

/// Lowers a compiled filter onto the builder as one WHERE conjunct.
///
/// Groups that end up empty (for example `$null: false`, or `$and: []`)
/// add nothing.
///
/// # Errors
///
/// Returns [`CmsError::InvalidFilter`] for operands the operator cannot take
/// (such as a `$between` that is not a two-element list).
pub fn apply_where(builder: &mut QueryBuilder, filter: &CompiledFilter) -> CmsResult<()> {
    if let Some(node) = to_where_node(filter)? {
        builder.and_where(node);
    }
    Ok(())
}

fn to_where_node(filter: &CompiledFilter) -> CmsResult<Option<WhereNode>> {
    match filter {
        CompiledFilter::And(children) => Ok(group(collect_nodes(children)?, WhereNode::And)),
        CompiledFilter::Or(children) => Ok(group(collect_nodes(children)?, WhereNode::Or)),
        CompiledFilter::Not(inner) => {
            Ok(to_where_node(inner)?.map(|node| WhereNode::Not(Box::new(node))))
        }
        CompiledFilter::Column { column, predicate } => column_node(column, predicate),
    }
}

fn collect_nodes(children: &[CompiledFilter]) -> CmsResult<Vec<WhereNode>> {
    let mut nodes = Vec::with_capacity(children.len());
    for child in children {
        if let Some(node) = to_where_node(child)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn group(mut nodes: Vec<WhereNode>, make: fn(Vec<WhereNode>) -> WhereNode) -> Option<WhereNode> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(make(nodes)),
    }
}

fn column_node(column: &str, predicate: &Predicate) -> CmsResult<Option<WhereNode>> {
    match predicate {
        Predicate::Value(v) => Ok(Some(WhereNode::condition(column, Lookup::Exact(v.clone())))),
        Predicate::List(values) => Ok(Some(WhereNode::condition(
            column,
            Lookup::In(values.clone()),
        ))),
        Predicate::Operators(ops) => {
            let mut nodes = Vec::with_capacity(ops.len());
            for (op, operand) in ops {
                if let Some(node) = operator_node(column, *op, operand)? {
                    nodes.push(node);
                }
            }
            Ok(group(nodes, WhereNode::And))
        }
    }
}

fn operator_node(column: &str, op: Operator, operand: &Predicate) -> CmsResult<Option<WhereNode>> {
    if let Predicate::List(values) = operand {
        if !op.is_array_operator() {
            let mut branches = Vec::with_capacity(values.len());
            for value in values {
                if let Some(node) = operator_node(column, op, &Predicate::Value(value.clone()))? {
                    branches.push(node);
                }
            }
            return Ok(group(branches, WhereNode::Or));
        }
    }

    let cond = |lookup| Ok(Some(WhereNode::condition(column, lookup)));
    match op {
        Operator::Not => Ok(column_node(column, operand)?.map(|node| WhereNode::Not(Box::new(node)))),
        Operator::Eq => cond(Lookup::Exact(scalar(op, operand)?)),
        Operator::Ne => cond(Lookup::NotEqual(scalar(op, operand)?)),
        Operator::Gt => cond(Lookup::Gt(scalar(op, operand)?)),
        Operator::Gte => cond(Lookup::Gte(scalar(op, operand)?)),
        Operator::Lt => cond(Lookup::Lt(scalar(op, operand)?)),
        Operator::Lte => cond(Lookup::Lte(scalar(op, operand)?)),
        Operator::In => cond(Lookup::In(list(op, operand)?)),
        Operator::NotIn => cond(Lookup::NotIn(list(op, operand)?)),
        Operator::Null => {
            if scalar(op, operand)?.is_truthy() {
                cond(Lookup::IsNull(true))
            } else {
                Ok(None)
            }
        }
        Operator::NotNull => {
            if scalar(op, operand)?.is_truthy() {
                cond(Lookup::IsNull(false))
            } else {
                Ok(None)
            }
        }
        Operator::Between => match operand {
            Predicate::List(values) if values.len() == 2 => {
                cond(Lookup::Range(values[0].clone(), values[1].clone()))
            }
            _ => Err(CmsError::InvalidFilter(
                "$between expects a list of two values".to_string(),
            )),
        },
        Operator::StartsWith => cond(Lookup::StartsWith(text(op, operand)?)),
        Operator::EndsWith => cond(Lookup::EndsWith(text(op, operand)?)),
        Operator::Contains => cond(Lookup::Contains(text(op, operand)?)),
        Operator::NotContains => cond(Lookup::NotContains(text(op, operand)?)),
    }
}

fn scalar(op: Operator, operand: &Predicate) -> CmsResult<Value> {
    match operand {
        Predicate::Value(v) => Ok(v.clone()),
        _ => Err(CmsError::InvalidFilter(format!("{op} expects a single value"))),
    }
}

fn list(op: Operator, operand: &Predicate) -> CmsResult<Vec<Value>> {
    match operand {
        Predicate::Value(v) => Ok(vec![v.clone()]),
        Predicate::List(values) => Ok(values.clone()),
        Predicate::Operators(_) => Err(CmsError::InvalidFilter(format!("{op} expects a list"))),
    }
}

fn text(op: Operator, operand: &Predicate) -> CmsResult<String> {
    Ok(match scalar(op, operand)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        JoinColumn, JoinTable, MetadataRegistry, ModelMetadata, RelationAttribute, RelationKind,
    };
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
                    "seo",
                    Attribute::Component {
                        component: "shared.seo".into(),
                        repeatable: false,
                    },
                )
                .attribute(
                    "category",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
                        .join_column(JoinColumn::new("category_id", "id")),
                )
                .attribute(
                    "tags",
                    RelationAttribute::new(RelationKind::ManyToMany, "api::category.category")
                        .join_table(JoinTable::new(
                            "products_tags_links",
                            JoinColumn::new("product_id", "id"),
                            JoinColumn::new("category_id", "id"),
                        )),
                )
                .attribute(
                    "morph",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::category.category"),
                ),
        );
        registry
    }

    fn compile(filters: &JsonValue) -> CmsResult<(QueryBuilder, CompiledFilter)> {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product")?;
        let ctx = qb.context(&registry)?;
        let compiled = process_where(filters, &mut qb, &ctx, 0)?;
        Ok((qb, compiled))
    }

    fn column(column: &str, predicate: Predicate) -> CompiledFilter {
        CompiledFilter::Column {
            column: column.to_string(),
            predicate,
        }
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!("$notIn".parse::<Operator>().unwrap(), Operator::NotIn);
        assert!(matches!(
            "$regex".parse::<Operator>(),
            Err(CmsError::UndefinedOperator(op)) if op == "$regex"
        ));
        assert!(Operator::Between.is_array_operator());
        assert!(!Operator::Eq.is_array_operator());
    }

    #[test]
    fn test_scalar_equality() {
        let (_, compiled) = compile(&json!({ "name": "Widget" })).unwrap();
        assert_eq!(compiled, column("t0.name", Predicate::Value(Value::from("Widget"))));
    }

    #[test]
    fn test_operators_and_lists() {
        let (_, compiled) =
            compile(&json!({ "price": { "$gte": 10, "$lt": 20 }, "id": [1, 2] })).unwrap();
        assert_eq!(
            compiled,
            CompiledFilter::And(vec![
                column(
                    "t0.price",
                    Predicate::Operators(vec![
                        (Operator::Gte, Predicate::Value(Value::Int(10))),
                        (Operator::Lt, Predicate::Value(Value::Int(20))),
                    ])
                ),
                column("t0.id", Predicate::List(vec![Value::Int(1), Value::Int(2)])),
            ])
        );
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let (_, compiled) = compile(&json!({ "legacy": 1, "t5.other": 2 })).unwrap();
        assert_eq!(
            compiled,
            CompiledFilter::And(vec![
                column("t0.legacy", Predicate::Value(Value::Int(1))),
                column("t5.other", Predicate::Value(Value::Int(2))),
            ])
        );
    }

    #[test]
    fn test_unknown_key_must_be_a_column_name() {
        for key in [
            "name\" = 'nope' OR 1=1 OR \"name",
            "price; DROP TABLE products",
            "t0.t1.name",
            "",
        ] {
            let filters = serde_json::Value::Object(
                std::iter::once((key.to_string(), json!(1))).collect(),
            );
            assert!(
                matches!(compile(&filters), Err(CmsError::InvalidFilter(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_relation_id_shorthand() {
        let (qb, compiled) = compile(&json!({ "category": 3 })).unwrap();
        assert_eq!(qb.joins().len(), 1);
        assert_eq!(compiled, column("t1.id", Predicate::Value(Value::Int(3))));

        let (_, compiled) = compile(&json!({ "category": { "$in": [1, 2] } })).unwrap();
        assert_eq!(
            compiled,
            column(
                "t1.id",
                Predicate::Operators(vec![(
                    Operator::In,
                    Predicate::List(vec![Value::Int(1), Value::Int(2)])
                )])
            )
        );
    }

    #[test]
    fn test_nested_relation_filter_uses_target_alias() {
        let (qb, compiled) = compile(&json!({ "tags": { "name": "Tools" } })).unwrap();
        assert_eq!(qb.joins().len(), 2);
        assert_eq!(compiled, column("t2.name", Predicate::Value(Value::from("Tools"))));
    }

    #[test]
    fn test_relation_filters_are_conjoined() {
        let (qb, compiled) = compile(&json!({
            "$and": [
                { "category": { "name": "A" } },
                { "category": { "name": "B" } }
            ]
        }))
        .unwrap();
        assert_eq!(qb.joins().len(), 2);
        assert_eq!(
            compiled,
            CompiledFilter::And(vec![
                column("t1.name", Predicate::Value(Value::from("A"))),
                column("t2.name", Predicate::Value(Value::from("B"))),
            ])
        );
    }

    #[test]
    fn test_root_level_operator_rejected() {
        let err = compile(&json!({ "$eq": 1 })).unwrap_err();
        assert!(matches!(err, CmsError::InvalidFilter(msg) if msg.contains("root level")));
        let err = compile(&json!({ "$or": [{ "$gt": 1 }] })).unwrap_err();
        assert!(matches!(err, CmsError::InvalidFilter(_)));
    }

    #[test]
    fn test_undefined_operator() {
        assert!(matches!(
            compile(&json!({ "$foo": 1 })),
            Err(CmsError::UndefinedOperator(_))
        ));
        assert!(matches!(
            compile(&json!({ "name": { "$like": "x" } })),
            Err(CmsError::UndefinedOperator(op)) if op == "$like"
        ));
    }

    #[test]
    fn test_where_must_be_object() {
        assert!(matches!(compile(&json!([1])), Err(CmsError::InvalidFilter(_))));
        assert!(matches!(
            compile(&json!({ "$and": { "name": "x" } })),
            Err(CmsError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_unsupported_filter_type() {
        assert!(matches!(
            compile(&json!({ "seo": { "title": "x" } })),
            Err(CmsError::UnsupportedFilterType(t)) if t == "component"
        ));
    }

    #[test]
    fn test_unlinked_relation_rejected() {
        assert!(matches!(
            compile(&json!({ "morph": 1 })),
            Err(CmsError::InvalidFilter(_))
        ));
    }

    fn lower(filters: &JsonValue) -> CmsResult<Vec<WhereNode>> {
        let (mut qb, compiled) = compile(filters)?;
        apply_where(&mut qb, &compiled)?;
        Ok(qb.wheres().to_vec())
    }

    #[test]
    fn test_array_expands_to_or_group() {
        let wheres = lower(&json!({ "name": { "$contains": ["a", "b"] } })).unwrap();
        assert_eq!(
            wheres,
            vec![WhereNode::Or(vec![
                WhereNode::condition("t0.name", Lookup::Contains("a".into())),
                WhereNode::condition("t0.name", Lookup::Contains("b".into())),
            ])]
        );
    }

    #[test]
    fn test_null_operators_respect_truthiness() {
        assert!(lower(&json!({ "name": { "$null": false } })).unwrap().is_empty());
        assert_eq!(
            lower(&json!({ "name": { "$notNull": true } })).unwrap(),
            vec![WhereNode::condition("t0.name", Lookup::IsNull(false))]
        );
    }

    #[test]
    fn test_not_and_between() {
        assert_eq!(
            lower(&json!({ "price": { "$not": { "$between": [1, 5] } } })).unwrap(),
            vec![WhereNode::Not(Box::new(WhereNode::condition(
                "t0.price",
                Lookup::Range(Value::Int(1), Value::Int(5))
            )))]
        );
        assert!(matches!(
            lower(&json!({ "price": { "$between": [1] } })),
            Err(CmsError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_not_group() {
        assert_eq!(
            lower(&json!({ "$not": { "name": "x" } })).unwrap(),
            vec![WhereNode::Not(Box::new(WhereNode::condition(
                "t0.name",
                Lookup::Exact(Value::from("x"))
            )))]
        );
    }

    #[test]
    fn test_like_operands_are_stringified() {
        assert_eq!(
            lower(&json!({ "name": { "$startsWith": 12, "$notContains": "z" } })).unwrap(),
            vec![WhereNode::And(vec![
                WhereNode::condition("t0.name", Lookup::StartsWith("12".into())),
                WhereNode::condition("t0.name", Lookup::NotContains("z".into())),
            ])]
        );
    }

    #[test]
    fn test_object_operand_rejected() {
        assert!(matches!(
            compile(&json!({ "price": { "$gt": { "a": 1 } } })),
            Err(CmsError::InvalidFilter(_))
        ));
    }
}
