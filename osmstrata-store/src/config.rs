//! Store configuration.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::layer::{LayerError, Layers, TablePrefix};

/// Default number of rows fetched per cursor page.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Settings for a [`SqliteMap`](crate::SqliteMap).
///
/// Deserialise it from whatever configuration source the caller owns; every
/// field has a default.
///
/// # Examples
///
/// ```
/// use osmstrata_store::MapConfig;
///
/// let config = MapConfig::default();
/// assert_eq!(config.static_prefix, "planet_");
/// assert_eq!(config.batch_size, 1000);
/// config.validate().expect("defaults are valid");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    /// Prefix of the read-only baseline tables.
    pub static_prefix: String,
    /// Prefix of the mutable overlay tables.
    pub active_prefix: String,
    /// Rows fetched per cursor page.
    pub batch_size: usize,
    /// Milliseconds to wait for a competing writer before failing.
    pub busy_timeout_ms: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            static_prefix: "planet_".to_owned(),
            active_prefix: "active_".to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            busy_timeout_ms: 5000,
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The cursor page size is zero.
    #[error("batch_size must be at least 1")]
    EmptyBatch,
    /// A layer prefix is unusable.
    #[error(transparent)]
    Layer(#[from] LayerError),
}

impl MapConfig {
    /// Checks the configuration and builds the layer pair.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the batch size is zero or a prefix is
    /// invalid or shared.
    pub fn validate(&self) -> Result<Layers, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        let layers = Layers::new(
            TablePrefix::new(self.static_prefix.as_str())?,
            TablePrefix::new(self.active_prefix.as_str())?,
        )?;
        Ok(layers)
    }

    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn partial_documents_fill_defaults() {
        let config: MapConfig =
            serde_json::from_str(r#"{"active_prefix":"mod_","batch_size":50}"#)
                .expect("parse config");
        assert_eq!(config.active_prefix, "mod_");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.static_prefix, "planet_");
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[rstest]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<MapConfig>(r#"{"dbname":"osm"}"#);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(MapConfig { batch_size: 0, ..MapConfig::default() }, ConfigError::EmptyBatch)]
    #[case(
        MapConfig { active_prefix: "planet_".into(), ..MapConfig::default() },
        ConfigError::Layer(LayerError::SharedPrefix { prefix: "planet_".into() })
    )]
    #[case(
        MapConfig { static_prefix: "bad prefix".into(), ..MapConfig::default() },
        ConfigError::Layer(LayerError::InvalidPrefix { prefix: "bad prefix".into() })
    )]
    fn invalid_settings_are_reported(#[case] config: MapConfig, #[case] expected: ConfigError) {
        assert_eq!(config.validate(), Err(expected));
    }
}
