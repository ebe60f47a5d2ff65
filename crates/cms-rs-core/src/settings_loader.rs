//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML files, JSON
//! files, and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `CMS_DEBUG` | `debug` |
//! | `CMS_LOG_LEVEL` | `log_level` |
//! | `CMS_DATABASE_ENGINE` | `database.engine` |
//! | `CMS_DATABASE_NAME` | `database.name` |
//! | `CMS_DEFAULT_PAGE_SIZE` | `query.default_page_size` |
//! | `CMS_MAX_PAGE_SIZE` | `query.max_page_size` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use cms_rs_core::settings_loader;
//!
//! // Load from TOML
//! let settings = settings_loader::from_toml_file("config/cms.toml").unwrap();
//!
//! // Load from JSON with environment overrides
//! let settings = settings_loader::from_json_file_with_env("config/cms.json").unwrap();
//! ```

use std::path::Path;

use crate::error::CmsError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, CmsError> {
    // Deserialize into a generic tree first, then merge over the defaults so
    // partial documents are accepted.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| CmsError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, CmsError> {
    let content = read_config(path.as_ref(), "TOML")?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, CmsError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, CmsError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| CmsError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, CmsError> {
    let content = read_config(path.as_ref(), "JSON")?;
    from_json_str(&content)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<Settings, CmsError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// Numeric variables that fail to parse are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("CMS_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Ok(val) = std::env::var("CMS_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("CMS_DATABASE_ENGINE") {
        settings.database.engine = val;
    }

    if let Ok(val) = std::env::var("CMS_DATABASE_NAME") {
        settings.database.name = val;
    }

    if let Ok(val) = std::env::var("CMS_DEFAULT_PAGE_SIZE") {
        if let Ok(size) = val.parse::<u64>() {
            settings.query.default_page_size = size;
        }
    }

    if let Ok(val) = std::env::var("CMS_MAX_PAGE_SIZE") {
        if let Ok(size) = val.parse::<u64>() {
            settings.query.max_page_size = size;
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_config(path: &Path, format: &str) -> Result<String, CmsError> {
    std::fs::read_to_string(path).map_err(|e| {
        CmsError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, CmsError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        CmsError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    let settings: Settings = serde_json::from_value(merged).map_err(|e| {
        CmsError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })?;

    if settings.query.default_page_size == 0
        || settings.query.default_page_size > settings.query.max_page_size
    {
        return Err(CmsError::ConfigurationError(format!(
            "query.default_page_size must be between 1 and {}",
            settings.query.max_page_size
        )));
    }
    Ok(settings)
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            log_level = "cms_rs_db=debug"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "cms_rs_db=debug");
        // Defaults preserved
        assert_eq!(settings.query.default_page_size, 10);
    }

    #[test]
    fn test_from_toml_str_nested_tables() {
        let toml = r#"
            [database]
            name = ":memory:"

            [query]
            max_page_size = 250
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.database.name, ":memory:");
        assert_eq!(settings.database.engine, "sqlite");
        assert_eq!(settings.query.max_page_size, 250);
        assert_eq!(settings.query.default_page_size, 10);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("this is not = [valid");
        assert!(matches!(result, Err(CmsError::ConfigurationError(_))));
    }

    #[test]
    fn test_page_size_bounds_checked() {
        let result = from_toml_str("[query]\ndefault_page_size = 500\nmax_page_size = 100");
        assert!(matches!(result, Err(CmsError::ConfigurationError(_))));

        let result = from_toml_str("[query]\ndefault_page_size = 0");
        assert!(matches!(result, Err(CmsError::ConfigurationError(_))));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"debug": false, "query": {"default_page_size": 25}, "extra": {"flag": true}}"#;
        let settings = from_json_str(json).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.query.default_page_size, 25);
        assert_eq!(settings.extra["flag"], serde_json::json!(true));
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{not json").is_err());
    }

    // ── Files ───────────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("cms_rs_test_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cms.toml");
        std::fs::write(&path, "log_level = \"warn\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.log_level, "warn");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_json_file() {
        let dir = std::env::temp_dir().join("cms_rs_test_json");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cms.json");
        std::fs::write(&path, r#"{"database": {"name": "content.db"}}"#).unwrap();

        let settings = from_json_file(&path).unwrap();
        assert_eq!(settings.database.name, "content.db");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/cms.toml");
        assert!(matches!(result, Err(CmsError::ConfigurationError(_))));
    }

    // ── Environment ─────────────────────────────────────────────────

    #[test]
    fn test_apply_env_overrides_max_page_size() {
        let mut settings = Settings::default();
        std::env::set_var("CMS_MAX_PAGE_SIZE", "40");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.query.max_page_size, 40);
        std::env::remove_var("CMS_MAX_PAGE_SIZE");
    }

    #[test]
    fn test_apply_env_overrides_invalid_number_ignored() {
        let mut settings = Settings::default();
        std::env::set_var("CMS_DEFAULT_PAGE_SIZE", "lots");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.query.default_page_size, 10);
        std::env::remove_var("CMS_DEFAULT_PAGE_SIZE");
    }

    #[test]
    fn test_apply_env_overrides_database_name() {
        let mut settings = Settings::default();
        std::env::set_var("CMS_DATABASE_NAME", ":memory:");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.database.name, ":memory:");
        std::env::remove_var("CMS_DATABASE_NAME");
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}});
        let over = serde_json::json!({"a": {"c": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged, serde_json::json!({"a": {"b": 1, "c": 3}}));
    }
}
