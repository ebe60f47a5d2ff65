//! # cms-rs
//!
//! A relation-aware content query engine for headless CMS backends.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. Depend on `cms-rs` to get the engine with the `SQLite` backend, or
//! depend on individual crates for finer-grained control.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cms_rs::prelude::*;
//!
//! # async fn demo(registry: MetadataRegistry) -> CmsResult<()> {
//! let settings = cms_rs::core::settings_loader::from_env();
//! cms_rs::core::logging::setup_logging(&settings);
//!
//! let backend = SqliteBackend::from_settings(&settings.database)?;
//! let service = EntityService::new(Arc::new(registry), settings.query);
//! let page = service
//!     .find_page(
//!         &backend,
//!         "api::product.product",
//!         QueryParams::new().populate(serde_json::json!({ "shops": { "count": true } })),
//!     )
//!     .await?;
//! println!("{}", page.to_json());
//! # Ok(())
//! # }
//! ```

/// Core types: errors, settings and logging.
pub use cms_rs_core as core;

/// The query engine: metadata, builders, filters, populate and the entity service.
pub use cms_rs_db as db;

/// Database backends: `SQLite`.
pub use cms_rs_db_backends as db_backends;

/// Testing utilities.
#[cfg(feature = "testing")]
pub use cms_rs_test as test;

/// The types most programs need.
pub mod prelude {
    pub use cms_rs_core::{CmsError, CmsResult, QuerySettings, Settings};
    pub use cms_rs_db::{
        Attribute, DbExecutor, EntityService, Field, JoinColumn, JoinTable, MetadataRegistry,
        ModelMetadata, Page, QueryParams, Record, RelationAttribute, RelationKind, ScalarType,
        Value,
    };
    #[cfg(feature = "sqlite")]
    pub use cms_rs_db_backends::SqliteBackend;
}
