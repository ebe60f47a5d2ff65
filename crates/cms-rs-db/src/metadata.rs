//! Model metadata and the metadata registry.
//!
//! A [`ModelMetadata`] describes one content type: its uid, physical table
//! and named [`Attribute`]s. Attributes are a tagged union so that a relation
//! always carries exactly one [`Linkage`] and scalars always carry a
//! [`ScalarType`].
//!
//! The [`MetadataRegistry`] holds every model by uid. It is built once at
//! startup and then shared read-only (usually behind an `Arc`).
//!
//! # Examples
//!
//! ```
//! use cms_rs_db::metadata::{
//!     Attribute, JoinColumn, MetadataRegistry, ModelMetadata, RelationAttribute, RelationKind,
//! };
//! use cms_rs_db::types::ScalarType;
//!
//! let mut registry = MetadataRegistry::new();
//! registry.register(
//!     ModelMetadata::new("api::category.category", "categories")
//!         .attribute("name", Attribute::scalar(ScalarType::String)),
//! );
//! registry.register(
//!     ModelMetadata::new("api::article.article", "articles")
//!         .attribute("title", Attribute::scalar(ScalarType::String))
//!         .attribute(
//!             "category",
//!             RelationAttribute::new(RelationKind::ManyToOne, "api::category.category")
//!                 .join_column(JoinColumn::new("category_id", "id"))
//!                 .owner(),
//!         ),
//! );
//! assert!(registry.validate().is_ok());
//! assert!(registry.get("api::article.article").unwrap().attribute_def("category").is_some());
//! ```

use std::collections::{BTreeMap, HashMap};

use cms_rs_core::{CmsError, CmsResult};
use serde::Deserialize;

use crate::schema::{ForeignKeyDef, IndexDef};
use crate::types::ScalarType;
use crate::value::Value;

/// A named attribute definition on a model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawAttribute")]
pub enum Attribute {
    /// A value stored in a column of the model's own table.
    Scalar(ScalarAttribute),
    /// A link to another model.
    Relation(RelationAttribute),
    /// An embedded component.
    Component {
        /// The component uid.
        component: String,
        /// Whether the component is a list.
        repeatable: bool,
    },
    /// A list of heterogeneous components.
    DynamicZone {
        /// The allowed component uids.
        components: Vec<String>,
    },
    /// A media reference.
    Media {
        /// Whether several files may be attached.
        multiple: bool,
    },
}

impl Attribute {
    /// Creates a scalar attribute of the given type.
    pub fn scalar(scalar_type: ScalarType) -> Self {
        Self::Scalar(ScalarAttribute::new(scalar_type))
    }

    /// Returns the type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(s) => s.scalar_type.name(),
            Self::Relation(_) => "relation",
            Self::Component { .. } => "component",
            Self::DynamicZone { .. } => "dynamiczone",
            Self::Media { .. } => "media",
        }
    }

    /// Returns `true` for scalar attributes.
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Returns `true` for relation attributes.
    pub const fn is_relation(&self) -> bool {
        matches!(self, Self::Relation(_))
    }

    /// Returns the scalar definition, if this is a scalar.
    pub const fn as_scalar(&self) -> Option<&ScalarAttribute> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the relation definition, if this is a relation.
    pub const fn as_relation(&self) -> Option<&RelationAttribute> {
        match self {
            Self::Relation(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ScalarAttribute> for Attribute {
    fn from(value: ScalarAttribute) -> Self {
        Self::Scalar(value)
    }
}

impl From<RelationAttribute> for Attribute {
    fn from(value: RelationAttribute) -> Self {
        Self::Relation(value)
    }
}

/// A scalar column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarAttribute {
    /// The declared type.
    pub scalar_type: ScalarType,
    /// Whether the column carries a unique index.
    pub unique: bool,
    /// Whether the column is NOT NULL.
    pub required: bool,
    /// Allowed values for enumerations.
    pub enum_values: Vec<String>,
}

impl ScalarAttribute {
    /// Creates a scalar definition with default flags.
    pub fn new(scalar_type: ScalarType) -> Self {
        Self {
            scalar_type,
            unique: scalar_type.is_unique_by_default(),
            required: false,
            enum_values: Vec::new(),
        }
    }

    /// Marks the column unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the column required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the allowed values of an enumeration.
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Converts a value to its storage form, checking enumeration membership.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidValue`] for values that cannot be stored.
    pub fn to_db(&self, value: &Value) -> CmsResult<Value> {
        let stored = self.scalar_type.to_db(value)?;
        if self.scalar_type == ScalarType::Enumeration {
            if let Value::String(s) = &stored {
                if !self.enum_values.iter().any(|v| v == s) {
                    return Err(CmsError::InvalidValue(format!(
                        "{s} is not one of [{}]",
                        self.enum_values.join(", ")
                    )));
                }
            }
        }
        Ok(stored)
    }

    /// Decodes a raw column value.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidValue`] when the stored value does not match
    /// the declared type.
    pub fn from_db(&self, value: &Value) -> CmsResult<Value> {
        self.scalar_type.from_db(value)
    }
}

/// The cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// One-to-one.
    OneToOne,
    /// One-to-many.
    OneToMany,
    /// Many-to-one.
    ManyToOne,
    /// Many-to-many.
    ManyToMany,
}

impl RelationKind {
    /// Returns `true` when each parent has at most one related entity.
    pub const fn is_to_one(self) -> bool {
        matches!(self, Self::OneToOne | Self::ManyToOne)
    }

    /// Returns `true` when each parent may have several related entities.
    pub const fn is_to_many(self) -> bool {
        !self.is_to_one()
    }
}

/// How a relation is physically stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Linkage {
    /// A foreign key column.
    JoinColumn(JoinColumn),
    /// An association table.
    JoinTable(JoinTable),
    /// No physical linkage. Such relations are not joinable and are skipped
    /// by populate.
    Unlinked,
}

/// A column linking two tables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinColumn {
    /// Column on the current table (or pivot table).
    pub name: String,
    /// Column on the other table.
    pub referenced_column: String,
    /// Explicit referenced table, used for foreign keys.
    #[serde(default)]
    pub referenced_table: Option<String>,
}

impl JoinColumn {
    /// Creates a join column from `name` to `referenced_column`.
    pub fn new(name: impl Into<String>, referenced_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column: referenced_column.into(),
            referenced_table: None,
        }
    }
}

/// An association (pivot) table linking two models.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTable {
    /// The pivot table name.
    pub name: String,
    /// Pivot column pointing at the current model.
    pub join_column: JoinColumn,
    /// Pivot column pointing at the target model.
    pub inverse_join_column: JoinColumn,
    /// Static discriminator filter applied to the pivot.
    pub on: Vec<(String, Value)>,
}

impl JoinTable {
    /// Creates a pivot definition without discriminators.
    pub fn new(name: impl Into<String>, join_column: JoinColumn, inverse_join_column: JoinColumn) -> Self {
        Self {
            name: name.into(),
            join_column,
            inverse_join_column,
            on: Vec::new(),
        }
    }

    /// Adds a static `pivot.key = value` condition.
    pub fn on(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.on.push((key.into(), value.into()));
        self
    }
}

/// A relation definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationAttribute {
    /// Relation cardinality.
    pub kind: RelationKind,
    /// Target model uid.
    pub target: String,
    /// Physical linkage.
    pub linkage: Linkage,
    /// Whether this side owns the physical column or pivot.
    pub owner: bool,
}

impl RelationAttribute {
    /// Creates an unlinked relation to `target`.
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            linkage: Linkage::Unlinked,
            owner: false,
        }
    }

    /// Links the relation through a join column.
    pub fn join_column(mut self, join_column: JoinColumn) -> Self {
        self.linkage = Linkage::JoinColumn(join_column);
        self
    }

    /// Links the relation through a join table.
    pub fn join_table(mut self, join_table: JoinTable) -> Self {
        self.linkage = Linkage::JoinTable(join_table);
        self
    }

    /// Marks this side as the owner of the physical linkage.
    pub fn owner(mut self) -> Self {
        self.owner = true;
        self
    }
}

// ── Deserialization ────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJoinTable {
    name: String,
    join_column: JoinColumn,
    inverse_join_column: JoinColumn,
    #[serde(default)]
    on: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttribute {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    required: bool,
    #[serde(default, rename = "enum")]
    enum_values: Vec<String>,
    relation: Option<RelationKind>,
    target: Option<String>,
    join_column: Option<JoinColumn>,
    join_table: Option<RawJoinTable>,
    #[serde(default)]
    owner: bool,
    component: Option<String>,
    #[serde(default)]
    repeatable: bool,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    multiple: bool,
}

impl TryFrom<RawAttribute> for Attribute {
    type Error = CmsError;

    fn try_from(raw: RawAttribute) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "relation" => {
                let kind = raw
                    .relation
                    .ok_or_else(|| CmsError::InvalidValue("relation attribute without kind".into()))?;
                let target = raw
                    .target
                    .ok_or_else(|| CmsError::InvalidValue("relation attribute without target".into()))?;
                let linkage = match (raw.join_column, raw.join_table) {
                    (Some(_), Some(_)) => {
                        return Err(CmsError::InvalidValue(format!(
                            "relation to {target} declares both a join column and a join table"
                        )))
                    }
                    (Some(jc), None) => Linkage::JoinColumn(jc),
                    (None, Some(jt)) => Linkage::JoinTable(JoinTable {
                        name: jt.name,
                        join_column: jt.join_column,
                        inverse_join_column: jt.inverse_join_column,
                        on: jt.on.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect(),
                    }),
                    (None, None) => Linkage::Unlinked,
                };
                Ok(Self::Relation(RelationAttribute {
                    kind,
                    target,
                    linkage,
                    owner: raw.owner,
                }))
            }
            "component" => Ok(Self::Component {
                component: raw
                    .component
                    .ok_or_else(|| CmsError::InvalidValue("component attribute without uid".into()))?,
                repeatable: raw.repeatable,
            }),
            "dynamiczone" => Ok(Self::DynamicZone {
                components: raw.components,
            }),
            "media" => Ok(Self::Media {
                multiple: raw.multiple,
            }),
            other => {
                let scalar_type: ScalarType = other.parse()?;
                Ok(Self::Scalar(ScalarAttribute {
                    scalar_type,
                    unique: raw.unique || scalar_type.is_unique_by_default(),
                    required: raw.required,
                    enum_values: raw.enum_values,
                }))
            }
        }
    }
}

// ── Models ─────────────────────────────────────────────────────────────

/// Metadata describing one content type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    /// The model uid (e.g. `api::product.product`).
    pub uid: String,
    /// The physical table name.
    pub table_name: String,
    /// Attributes keyed by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    /// Extra index descriptions.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Extra foreign key descriptions.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl ModelMetadata {
    /// Creates model metadata with an auto-incrementing `id` attribute.
    pub fn new(uid: impl Into<String>, table_name: impl Into<String>) -> Self {
        let mut meta = Self {
            uid: uid.into(),
            table_name: table_name.into(),
            attributes: BTreeMap::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        };
        meta.ensure_id();
        meta
    }

    /// Adds (or replaces) an attribute.
    pub fn attribute(mut self, name: impl Into<String>, attribute: impl Into<Attribute>) -> Self {
        self.attributes.insert(name.into(), attribute.into());
        self
    }

    /// Looks up an attribute by name.
    pub fn attribute_def(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Looks up an attribute, failing with [`CmsError::UnknownAttribute`].
    ///
    /// # Errors
    ///
    /// Returns an error if the model has no attribute with that name.
    pub fn require_attribute(&self, name: &str) -> CmsResult<&Attribute> {
        self.attributes
            .get(name)
            .ok_or_else(|| CmsError::unknown_attribute(&self.uid, name))
    }

    /// Iterates over the relation attributes in name order.
    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationAttribute)> {
        self.attributes
            .iter()
            .filter_map(|(name, attr)| attr.as_relation().map(|r| (name.as_str(), r)))
    }

    fn ensure_id(&mut self) {
        self.attributes
            .entry("id".to_string())
            .or_insert_with(|| Attribute::scalar(ScalarType::Increments));
    }
}

/// The registry of all known models, keyed by uid.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    models: HashMap<String, ModelMetadata>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, replacing any previous definition with the same uid.
    pub fn register(&mut self, meta: ModelMetadata) -> &mut Self {
        self.models.insert(meta.uid.clone(), meta);
        self
    }

    /// Returns the metadata for `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] for unknown uids.
    pub fn get(&self, uid: &str) -> CmsResult<&ModelMetadata> {
        self.models
            .get(uid)
            .ok_or_else(|| CmsError::ModelNotFound(uid.to_string()))
    }

    /// Returns `true` if a model with that uid is registered.
    pub fn contains(&self, uid: &str) -> bool {
        self.models.contains_key(uid)
    }

    /// Iterates over all registered models in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelMetadata> {
        self.models.values()
    }

    /// Returns the number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Checks that every relation points at a registered model.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::ModelNotFound`] naming the first dangling target.
    pub fn validate(&self) -> CmsResult<()> {
        for meta in self.models.values() {
            for (_, relation) in meta.relations() {
                if !self.contains(&relation.target) {
                    return Err(CmsError::ModelNotFound(relation.target.clone()));
                }
            }
        }
        Ok(())
    }

    /// Builds a registry from a JSON array of content-type definitions.
    ///
    /// Every model receives an `id` attribute if it does not declare one.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::SerializationError`] for malformed documents and
    /// [`CmsError::ModelNotFound`] for dangling relation targets.
    pub fn from_json_str(json: &str) -> CmsResult<Self> {
        let models: Vec<ModelMetadata> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for mut meta in models {
            meta.ensure_id();
            registry.register(meta);
        }
        registry.validate()?;
        tracing::debug!(models = registry.len(), "loaded content-type metadata");
        Ok(registry)
    }
}
