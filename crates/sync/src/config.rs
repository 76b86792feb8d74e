#![forbid(unsafe_code)]

//! Deployment configuration, read from TOML.
//!
//! ```toml
//! storage_dir = "/var/lib/arbor"
//! log_filter = "arbor=debug"
//!
//! [order]
//! target_delta = 1.0
//! minimal_delta = 0.001
//!
//! [[levels]]
//! name = "owner"
//!
//! [[levels]]
//! name = "section"
//! orderable = true
//! ```

use arbor_core::hierarchy::HierarchyError;
use arbor_core::{Hierarchy, LevelDef, OrderError, OrderPolicy, OrderValueManager};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub storage_dir: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub order: OrderPolicy,
    pub levels: Vec<LevelDef>,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("levels: {0}")]
    Hierarchy(#[from] HierarchyError),
    #[error("order: {0}")]
    Order(#[from] OrderError),
}

impl SyncConfig {
    /// Parses and validates a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.hierarchy()?;
        config.order.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn hierarchy(&self) -> Result<Hierarchy, ConfigError> {
        Ok(Hierarchy::try_new(self.levels.clone())?)
    }

    pub fn order_manager(&self) -> Result<OrderValueManager, ConfigError> {
        Ok(OrderValueManager::new(self.order.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
storage_dir = "/tmp/arbor"

[order]
minimal_delta = 0.01

[[levels]]
name = "owner"

[[levels]]
name = "document"

[[levels]]
name = "section"
orderable = true
"#;

    #[test]
    fn parses_levels_and_fills_order_defaults() {
        let config = SyncConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/arbor"));
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.order.minimal_delta, 0.01);
        assert_eq!(config.order.target_delta, OrderPolicy::default().target_delta);

        let hierarchy = config.hierarchy().unwrap();
        assert_eq!(hierarchy.len(), 3);
        assert_eq!(hierarchy.level("section").map(|l| l.depth()), Some(2));
        assert!(hierarchy.is_orderable(arbor_core::Level::new(2)));
        assert!(config.order_manager().is_ok());
    }

    #[test]
    fn duplicate_level_names_are_rejected() {
        let raw = r#"
storage_dir = "x"

[[levels]]
name = "owner"

[[levels]]
name = "owner"
"#;
        assert!(matches!(
            SyncConfig::from_toml_str(raw),
            Err(ConfigError::Hierarchy(HierarchyError::DuplicateName(_)))
        ));
    }

    #[test]
    fn minimal_delta_wider_than_the_gap_is_rejected() {
        let raw = r#"
storage_dir = "x"

[order]
target_delta = 1.0
minimal_delta = 2.0

[[levels]]
name = "owner"
"#;
        assert!(matches!(
            SyncConfig::from_toml_str(raw),
            Err(ConfigError::Order(_))
        ));
    }

    #[test]
    fn unknown_keys_are_errors() {
        let raw = r#"
storage_dir = "x"
levls = []
levels = []
"#;
        assert!(matches!(
            SyncConfig::from_toml_str(raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = SyncConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
