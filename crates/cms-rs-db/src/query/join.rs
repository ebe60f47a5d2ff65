//! Join planning for relation attributes.
//!
//! [`create_join`] registers the joins needed to reach the target table of a
//! relation and returns the alias the target is reachable under. Filters and
//! orderings that traverse relations go through it.

use cms_rs_core::{CmsError, CmsResult};

use crate::metadata::{Attribute, JoinTable, Linkage, ModelMetadata};
use crate::query::builder::{Join, JoinType, QueryBuilder, QueryContext};

/// Registers the joins reaching the target of `attribute` from `alias`.
///
/// - join column: one join `alias.name = new.referenced_column`;
/// - join table: one join to the pivot (with its static `on` filter) and one
///   from the pivot to the target;
/// - unlinked: no join, `alias` is returned unchanged.
///
/// # Errors
///
/// Returns [`CmsError::InvalidJoin`] if `attribute` is not a relation and
/// [`CmsError::ModelNotFound`] if the target is not registered.
pub fn create_join(
    builder: &mut QueryBuilder,
    ctx: &QueryContext<'_>,
    alias: &str,
    attribute_name: &str,
    attribute: &Attribute,
) -> CmsResult<String> {
    let Attribute::Relation(relation) = attribute else {
        return Err(CmsError::InvalidJoin(attribute_name.to_string()));
    };
    let target = ctx.registry.get(&relation.target)?;

    match &relation.linkage {
        Linkage::JoinColumn(jc) => {
            let join_alias = builder.get_alias();
            builder.left_join(Join {
                join_type: JoinType::Left,
                alias: join_alias.clone(),
                referenced_table: target.table_name.clone(),
                referenced_column: jc.referenced_column.clone(),
                root_table: alias.to_string(),
                root_column: jc.name.clone(),
                on: Vec::new(),
            });
            Ok(join_alias)
        }
        Linkage::JoinTable(jt) => Ok(create_pivot_join(builder, alias, jt, target)),
        Linkage::Unlinked => Ok(alias.to_string()),
    }
}

/// Joins `alias` to the pivot table, then the pivot to the target. Returns
/// the target alias.
pub fn create_pivot_join(
    builder: &mut QueryBuilder,
    alias: &str,
    join_table: &JoinTable,
    target: &ModelMetadata,
) -> String {
    let pivot_alias = builder.get_alias();
    builder.left_join(Join {
        join_type: JoinType::Left,
        alias: pivot_alias.clone(),
        referenced_table: join_table.name.clone(),
        referenced_column: join_table.join_column.name.clone(),
        root_table: alias.to_string(),
        root_column: join_table.join_column.referenced_column.clone(),
        on: join_table.on.clone(),
    });

    let target_alias = builder.get_alias();
    builder.left_join(Join {
        join_type: JoinType::Left,
        alias: target_alias.clone(),
        referenced_table: target.table_name.clone(),
        referenced_column: join_table.inverse_join_column.referenced_column.clone(),
        root_table: pivot_alias,
        root_column: join_table.inverse_join_column.name.clone(),
        on: Vec::new(),
    });
    target_alias
}

/// Joins the pivot table onto a builder rooted at the relation *target*.
///
/// Used when loading related rows for a set of parents: the pivot is joined
/// from `t0.<inverse referenced column>` and the returned alias exposes the
/// pivot's `join_column.name`, which identifies the parent.
pub fn join_pivot_from_target(builder: &mut QueryBuilder, join_table: &JoinTable) -> String {
    let pivot_alias = builder.get_alias();
    let root = builder.alias().to_string();
    builder.join(Join {
        join_type: JoinType::Inner,
        alias: pivot_alias.clone(),
        referenced_table: join_table.name.clone(),
        referenced_column: join_table.inverse_join_column.name.clone(),
        root_table: root,
        root_column: join_table.inverse_join_column.referenced_column.clone(),
        on: join_table.on.clone(),
    });
    pivot_alias
}
