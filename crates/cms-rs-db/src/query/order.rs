//! The order compiler.
//!
//! Accepts `"name"`, `["name", { "price": "desc" }]` and
//! `{ "category": { "name": "asc" } }`; relation keys are joined and the
//! nested value is compiled against the target model.

use cms_rs_core::{CmsError, CmsResult};
use serde_json::Value as JsonValue;

use crate::metadata::{Attribute, Linkage};
use crate::query::builder::{OrderBy, QueryBuilder, QueryContext, SortDirection};
use crate::query::join::create_join;

/// Compiles an order specification into qualified order entries.
///
/// # Errors
///
/// - [`CmsError::UnknownAttribute`] for names absent from the model;
/// - [`CmsError::UnsupportedOrderType`] for non-scalar terminal attributes;
/// - [`CmsError::InvalidOrderBy`] for malformed shapes and directions.
pub fn process_order_by(
    order_by: &JsonValue,
    builder: &mut QueryBuilder,
    ctx: &QueryContext<'_>,
) -> CmsResult<Vec<OrderBy>> {
    match order_by {
        JsonValue::String(name) => match ctx.attribute(name)? {
            Attribute::Scalar(_) => Ok(vec![OrderBy::new(format!("{}.{name}", ctx.alias), None)]),
            other => Err(CmsError::UnsupportedOrderType(other.type_name().to_string())),
        },
        JsonValue::Array(items) => {
            let mut orders = Vec::new();
            for item in items {
                orders.extend(process_order_by(item, builder, ctx)?);
            }
            Ok(orders)
        }
        JsonValue::Object(map) => {
            let mut orders = Vec::with_capacity(map.len());
            for (key, direction) in map {
                let attribute = ctx.attribute(key)?;
                match attribute {
                    Attribute::Scalar(_) => orders.push(OrderBy::new(
                        format!("{}.{key}", ctx.alias),
                        Some(parse_direction(direction)?),
                    )),
                    Attribute::Relation(relation) => {
                        if relation.linkage == Linkage::Unlinked {
                            return Err(CmsError::InvalidOrderBy(format!(
                                "relation {key} has no join linkage and cannot be ordered by"
                            )));
                        }
                        let sub_alias = create_join(builder, ctx, &ctx.alias, key, attribute)?;
                        let target_ctx = ctx.for_target(&relation.target, sub_alias)?;
                        orders.extend(process_order_by(direction, builder, &target_ctx)?);
                    }
                    other => {
                        return Err(CmsError::UnsupportedOrderType(other.type_name().to_string()))
                    }
                }
            }
            Ok(orders)
        }
        other => Err(CmsError::InvalidOrderBy(format!(
            "orderBy must be a string, a list or an object, got {other}"
        ))),
    }
}

fn parse_direction(direction: &JsonValue) -> CmsResult<SortDirection> {
    match direction.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("asc") => Ok(SortDirection::Asc),
        Some("desc") => Ok(SortDirection::Desc),
        _ => Err(CmsError::InvalidOrderBy(format!(
            "direction must be asc or desc, got {direction}"
        ))),
    }
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
            ModelMetadata::new("api::shop.shop", "shops")
                .attribute("name", Attribute::scalar(ScalarType::String)),
        );
        registry.register(
            ModelMetadata::new("api::product.product", "products")
                .attribute("name", Attribute::scalar(ScalarType::String))
                .attribute("price", Attribute::scalar(ScalarType::Decimal))
                .attribute("cover", Attribute::Media { multiple: false })
                .attribute(
                    "main_shop",
                    RelationAttribute::new(RelationKind::ManyToOne, "api::shop.shop")
                        .join_column(JoinColumn::new("main_shop_id", "id")),
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
                ),
        );
        registry
    }

    fn compile(order_by: &JsonValue) -> CmsResult<(QueryBuilder, Vec<OrderBy>)> {
        let registry = registry();
        let mut qb = QueryBuilder::new(&registry, "api::product.product")?;
        let ctx = qb.context(&registry)?;
        let orders = process_order_by(order_by, &mut qb, &ctx)?;
        Ok((qb, orders))
    }

    #[test]
    fn test_string_form() {
        let (_, orders) = compile(&json!("name")).unwrap();
        assert_eq!(orders, vec![OrderBy::new("t0.name", None)]);
    }

    #[test]
    fn test_list_form_flattens() {
        let (_, orders) = compile(&json!(["name", { "price": "DESC" }])).unwrap();
        assert_eq!(
            orders,
            vec![
                OrderBy::new("t0.name", None),
                OrderBy::new("t0.price", Some(SortDirection::Desc)),
            ]
        );
    }

    #[test]
    fn test_relation_order_joins() {
        let (qb, orders) = compile(&json!({ "main_shop": { "name": "asc" } })).unwrap();
        assert_eq!(qb.joins().len(), 1);
        assert_eq!(orders, vec![OrderBy::new("t1.name", Some(SortDirection::Asc))]);

        let (qb, orders) = compile(&json!({ "shops": { "name": "desc" } })).unwrap();
        assert_eq!(qb.joins().len(), 2);
        assert_eq!(orders, vec![OrderBy::new("t2.name", Some(SortDirection::Desc))]);
    }

    #[test]
    fn test_unknown_attribute() {
        assert!(matches!(
            compile(&json!("unknownField")),
            Err(CmsError::UnknownAttribute { attribute, .. }) if attribute == "unknownField"
        ));
        assert!(matches!(
            compile(&json!({ "nope": "asc" })),
            Err(CmsError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_unsupported_types() {
        assert!(matches!(
            compile(&json!({ "cover": "asc" })),
            Err(CmsError::UnsupportedOrderType(t)) if t == "media"
        ));
        assert!(matches!(
            compile(&json!("shops")),
            Err(CmsError::UnsupportedOrderType(t)) if t == "relation"
        ));
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(compile(&json!(42)), Err(CmsError::InvalidOrderBy(_))));
        assert!(matches!(
            compile(&json!({ "name": "sideways" })),
            Err(CmsError::InvalidOrderBy(_))
        ));
    }
}
