//! Core error types for the cms-rs query engine.
//!
//! This module provides the error enum [`CmsError`] that covers query-shape
//! errors (unknown attributes, malformed filters, invalid populate requests),
//! metadata lookups, value coercion, database failures, and configuration
//! problems.
//!
//! The engine has no notion of HTTP status. Callers that expose the engine
//! over a network boundary can use [`CmsError::is_client_error`] to decide
//! whether the failure was caused by the request shape.

use thiserror::Error;

/// The primary error type for cms-rs.
///
/// Every invalid clause aborts query construction before any SQL runs; there
/// is no partial recovery and no retry.
#[derive(Error, Debug)]
pub enum CmsError {
    // ── Query shape ──────────────────────────────────────────────────

    /// A filter, order, or populate clause names an attribute the model does not have.
    #[error("Attribute {attribute} not found on model {uid}")]
    UnknownAttribute {
        /// The model being queried.
        uid: String,
        /// The attribute name that could not be resolved.
        attribute: String,
    },

    /// Filtering was attempted on an attribute kind that cannot be filtered.
    #[error("You cannot filter on {0} types")]
    UnsupportedFilterType(String),

    /// Ordering was attempted on an attribute kind that cannot be ordered.
    #[error("You cannot order on {0} types")]
    UnsupportedOrderType(String),

    /// The filter tree is malformed.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// The order specification is malformed.
    #[error("Invalid orderBy syntax: {0}")]
    InvalidOrderBy(String),

    /// The populate specification is malformed or targets a non-relation.
    #[error("Invalid populate: {0}")]
    InvalidPopulate(String),

    /// A join was requested on a non-relation attribute.
    #[error("Cannot join on non relational field {0}")]
    InvalidJoin(String),

    /// A `$`-prefixed key is not a known operator.
    #[error("Undefined operator {0}")]
    UndefinedOperator(String),

    /// Pagination parameters are out of range.
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    /// A relation preview targeted a field that is not an x-to-many relation.
    #[error("Invalid target field {0}")]
    InvalidTargetField(String),

    // ── Metadata and values ──────────────────────────────────────────

    /// No model is registered under the given uid.
    #[error("Model {0} not found")]
    ModelNotFound(String),

    /// A value could not be coerced to or from its database representation.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The requested entity does not exist.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CmsError {
    /// Creates an [`CmsError::UnknownAttribute`].
    pub fn unknown_attribute(uid: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            uid: uid.into(),
            attribute: attribute.into(),
        }
    }

    /// Returns `true` if the error was caused by the shape or content of the
    /// caller's request rather than by the engine or the database.
    ///
    /// - query-shape errors and invalid values -> `true`
    /// - `EntityNotFound`, `ModelNotFound` -> `true`
    /// - database, configuration, serialization, IO -> `false`
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::UnknownAttribute { .. }
            | Self::UnsupportedFilterType(_)
            | Self::UnsupportedOrderType(_)
            | Self::InvalidFilter(_)
            | Self::InvalidOrderBy(_)
            | Self::InvalidPopulate(_)
            | Self::InvalidJoin(_)
            | Self::UndefinedOperator(_)
            | Self::InvalidPagination(_)
            | Self::InvalidTargetField(_)
            | Self::InvalidValue(_)
            | Self::ModelNotFound(_)
            | Self::EntityNotFound(_) => true,
            Self::DatabaseError(_)
            | Self::OperationalError(_)
            | Self::ConfigurationError(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => false,
        }
    }
}

impl From<serde_json::Error> for CmsError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// A convenience type alias for `Result<T, CmsError>`.
pub type CmsResult<T> = Result<T, CmsError>;
