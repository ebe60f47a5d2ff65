//! Table descriptions derived from model metadata.
//!
//! The derivation is descriptive only: it lists the columns, indexes and
//! foreign keys each model needs, plus the pivot tables of its join-table
//! relations. There is no diffing and no migration history.
//! [`TableDef::to_sqlite_ddl`] renders the description for an in-memory
//! SQLite database, which is what the test tooling uses.

use std::collections::BTreeSet;

use cms_rs_core::CmsResult;
use serde::Deserialize;

use crate::metadata::{Attribute, JoinTable, Linkage, MetadataRegistry, ModelMetadata};
use crate::query::compiler::quote_ident;
use crate::types::ColumnType;
use crate::value::Value;

/// A column description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Physical type.
    pub column_type: ColumnType,
    /// Whether the column is the primary key.
    pub primary: bool,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the integer column is unsigned.
    pub unsigned: bool,
}

impl ColumnDef {
    fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let primary = column_type == ColumnType::Increments;
        Self {
            name: name.into(),
            column_type,
            primary,
            nullable: !primary,
            unsigned: false,
        }
    }
}

/// The kind of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// A plain lookup index.
    Index,
    /// A unique index.
    Unique,
    /// The primary key.
    Primary,
}

/// An index description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Index kind.
    #[serde(rename = "type", default = "default_index_type")]
    pub index_type: IndexType,
}

const fn default_index_type() -> IndexType {
    IndexType::Index
}

/// A foreign key description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// `ON DELETE` action.
    #[serde(default)]
    pub on_delete: Option<String>,
}

/// A table description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Indexes.
    pub indexes: Vec<IndexDef>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    /// Returns the column with the given name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Renders `CREATE TABLE IF NOT EXISTS` followed by one
    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS` per non-primary index.
    pub fn to_sqlite_ddl(&self) -> Vec<String> {
        let unique: BTreeSet<&str> = self
            .indexes
            .iter()
            .filter(|i| i.index_type == IndexType::Unique && i.columns.len() == 1)
            .map(|i| i.columns[0].as_str())
            .collect();

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut part = format!("{} {}", quote_ident(&col.name), col.column_type.sqlite_type());
                if !col.nullable && !col.primary {
                    part.push_str(" NOT NULL");
                }
                if unique.contains(col.name.as_str()) {
                    part.push_str(" UNIQUE");
                }
                part
            })
            .collect();

        for fk in &self.foreign_keys {
            let mut part = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_list(&fk.columns),
                quote_ident(&fk.referenced_table),
                quote_list(&fk.referenced_columns)
            );
            if let Some(action) = &fk.on_delete {
                part.push_str(&format!(" ON DELETE {action}"));
            }
            parts.push(part);
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            parts.join(", ")
        )];

        for index in &self.indexes {
            let keyword = match index.index_type {
                IndexType::Primary => continue,
                IndexType::Unique if index.columns.len() == 1 => continue,
                IndexType::Unique => "UNIQUE INDEX",
                IndexType::Index => "INDEX",
            };
            statements.push(format!(
                "CREATE {keyword} IF NOT EXISTS {} ON {} ({})",
                quote_ident(&index.name),
                quote_ident(&self.name),
                quote_list(&index.columns)
            ));
        }
        statements
    }
}

/// The set of tables describing a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    /// Tables in creation order (model tables first, then pivots).
    pub tables: Vec<TableDef>,
}

impl Schema {
    /// Returns the table with the given name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Describes the table of a single model.
///
/// Scalar attributes become columns (`unique` and primary columns also get an
/// index named `<table>_<column>_unique` / `<table>_<column>_primary`).
/// Owning join-column relations become an unsigned integer column and a
/// foreign key named `<column>_fk` with `ON DELETE SET NULL`.
///
/// # Errors
///
/// Returns [`cms_rs_core::CmsError::ModelNotFound`] if a relation targets an
/// unregistered model.
pub fn create_table(meta: &ModelMetadata, registry: &MetadataRegistry) -> CmsResult<TableDef> {
    let mut table = TableDef {
        name: meta.table_name.clone(),
        columns: Vec::new(),
        indexes: meta.indexes.clone(),
        foreign_keys: meta.foreign_keys.clone(),
    };

    // `id` first so the primary key leads the column list.
    let ordered = meta
        .attributes
        .iter()
        .filter(|(name, _)| name.as_str() == "id")
        .chain(meta.attributes.iter().filter(|(name, _)| name.as_str() != "id"));

    for (name, attribute) in ordered {
        match attribute {
            Attribute::Scalar(scalar) => {
                let mut column =
                    ColumnDef::new(name, scalar.scalar_type.column_type(&scalar.enum_values));
                if scalar.required {
                    column.nullable = false;
                }
                if column.primary {
                    table.indexes.push(IndexDef {
                        name: format!("{}_{name}_primary", table.name),
                        columns: vec![name.clone()],
                        index_type: IndexType::Primary,
                    });
                } else if scalar.unique {
                    table.indexes.push(IndexDef {
                        name: format!("{}_{name}_unique", table.name),
                        columns: vec![name.clone()],
                        index_type: IndexType::Unique,
                    });
                }
                table.columns.push(column);
            }
            Attribute::Relation(relation) => {
                let Linkage::JoinColumn(jc) = &relation.linkage else {
                    continue;
                };
                if !relation.owner || table.column(&jc.name).is_some() {
                    continue;
                }
                let referenced_table = match &jc.referenced_table {
                    Some(t) => t.clone(),
                    None => registry.get(&relation.target)?.table_name.clone(),
                };
                let mut column = ColumnDef::new(&jc.name, ColumnType::Integer);
                column.unsigned = true;
                table.columns.push(column);
                table.foreign_keys.push(ForeignKeyDef {
                    name: format!("{}_fk", jc.name),
                    columns: vec![jc.name.clone()],
                    referenced_table,
                    referenced_columns: vec![jc.referenced_column.clone()],
                    on_delete: Some("SET NULL".to_string()),
                });
            }
            Attribute::Component { .. } | Attribute::DynamicZone { .. } | Attribute::Media { .. } => {}
        }
    }

    Ok(table)
}

/// Derives the pivot table of a join-table relation: an `id`, both join
/// columns (cascading on delete) and one column per static `on` condition.
pub fn create_pivot_table(
    join_table: &JoinTable,
    source_table: &str,
    target_table: &str,
) -> TableDef {
    let mut columns = vec![ColumnDef::new("id", ColumnType::Increments)];
    for jc in [&join_table.join_column, &join_table.inverse_join_column] {
        let mut column = ColumnDef::new(&jc.name, ColumnType::Integer);
        column.unsigned = true;
        columns.push(column);
    }
    for (key, value) in &join_table.on {
        let column_type = match value {
            Value::Int(_) | Value::Bool(_) => ColumnType::Integer,
            _ => ColumnType::String,
        };
        columns.push(ColumnDef::new(key, column_type));
    }

    let foreign_keys = [
        (&join_table.join_column, source_table),
        (&join_table.inverse_join_column, target_table),
    ]
    .into_iter()
    .map(|(jc, referenced)| ForeignKeyDef {
        name: format!("{}_{}_fk", join_table.name, jc.name),
        columns: vec![jc.name.clone()],
        referenced_table: referenced.to_string(),
        referenced_columns: vec![jc.referenced_column.clone()],
        on_delete: Some("CASCADE".to_string()),
    })
    .collect();

    TableDef {
        name: join_table.name.clone(),
        columns,
        indexes: vec![
            IndexDef {
                name: format!("{}_fk", join_table.name),
                columns: vec![join_table.join_column.name.clone()],
                index_type: IndexType::Index,
            },
            IndexDef {
                name: format!("{}_inv_fk", join_table.name),
                columns: vec![join_table.inverse_join_column.name.clone()],
                index_type: IndexType::Index,
            },
        ],
        foreign_keys,
    }
}

/// Describes every model table and every pivot table in the registry.
///
/// Model tables are sorted by table name; pivot tables follow, deduplicated
/// by name so both sides of a bidirectional many-to-many share one pivot.
///
/// # Errors
///
/// Returns [`cms_rs_core::CmsError::ModelNotFound`] for dangling relation
/// targets.
pub fn metadata_to_schema(registry: &MetadataRegistry) -> CmsResult<Schema> {
    let mut models: Vec<&ModelMetadata> = registry.iter().collect();
    models.sort_by(|a, b| a.table_name.cmp(&b.table_name));

    let mut schema = Schema::default();
    for meta in &models {
        schema.tables.push(create_table(meta, registry)?);
    }

    let mut pivots = BTreeSet::new();
    for meta in &models {
        for (_, relation) in meta.relations() {
            let Linkage::JoinTable(jt) = &relation.linkage else {
                continue;
            };
            if !pivots.insert(jt.name.clone()) {
                continue;
            }
            let target = registry.get(&relation.target)?;
            schema
                .tables
                .push(create_pivot_table(jt, &meta.table_name, &target.table_name));
        }
    }

    Ok(schema)
}
