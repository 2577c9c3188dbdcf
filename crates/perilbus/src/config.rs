//! Bus configuration.
//!
//! [`BusConfig`] carries everything a process needs to reach the broker
//! and consume from it: the broker address, the prefetch bound, the
//! dead-letter exchange, and the default payload format. Every field has a
//! default, so an empty file (or no file at all) is a valid configuration.
//!
//! [`BusConfig::load`] layers, lowest priority first:
//!
//! 1. the defaults below,
//! 2. an optional `config/perilbus.{toml,json,yaml,…}` file,
//! 3. `PERILBUS_*` environment variables (`PERILBUS_PREFETCH=20`).

use std::path::Path;

use config::{Config, Environment, File};
use perilbus_codec::Format;
use serde::{Deserialize, Serialize};

use crate::BusError;

/// Default broker address: the in-process broker named `peril`.
pub const DEFAULT_URL: &str = "memory://peril";

/// Default prefetch count per subscription.
pub const DEFAULT_PREFETCH: u16 = 10;

/// Default dead-letter exchange.
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Configuration file looked up by [`BusConfig::load`], without extension.
pub const CONFIG_FILE: &str = "config/perilbus";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PERILBUS";

/// Connection and consumption settings for the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker address, e.g. `memory://peril` or an AMQP URL.
    pub url: String,

    /// Maximum unacknowledged deliveries per subscription (0 = unlimited).
    pub prefetch: u16,

    /// Exchange that receives discarded messages. `None` drops them.
    pub dead_letter_exchange: Option<String>,

    /// Payload format used by publishers unless a call site picks one.
    pub default_format: Format,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            prefetch: DEFAULT_PREFETCH,
            dead_letter_exchange: Some(DEFAULT_DEAD_LETTER_EXCHANGE.to_string()),
            default_format: Format::Json,
        }
    }
}

impl BusConfig {
    /// Loads `config/perilbus.*` (if present) and `PERILBUS_*` variables
    /// over the defaults.
    pub fn load() -> Result<Self, BusError> {
        Self::from_builder(
            Config::builder().add_source(File::with_name(CONFIG_FILE).required(false)),
        )
    }

    /// Loads the given file (which must exist) and `PERILBUS_*` variables
    /// over the defaults. The format is taken from the file extension.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, BusError> {
        Self::from_builder(Config::builder().add_source(File::from(path.as_ref()).required(true)))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, BusError> {
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let loaded: Self = config.try_deserialize()?;
        tracing::debug!(
            url = %loaded.url,
            prefetch = loaded.prefetch,
            dead_letter_exchange = ?loaded.dead_letter_exchange,
            default_format = ?loaded.default_format,
            "bus configuration loaded"
        );
        Ok(loaded)
    }

    /// Sets the broker address.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the prefetch count.
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Sets or clears the dead-letter exchange.
    pub fn dead_letter_exchange(mut self, exchange: Option<impl Into<String>>) -> Self {
        self.dead_letter_exchange = exchange.map(Into::into);
        self
    }

    /// Sets the default payload format.
    pub fn default_format(mut self, format: Format) -> Self {
        self.default_format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.url, "memory://peril");
        assert_eq!(cfg.prefetch, 10);
        assert_eq!(cfg.dead_letter_exchange.as_deref(), Some("peril_dlx"));
        assert_eq!(cfg.default_format, Format::Json);
    }

    #[test]
    fn test_builder_setters() {
        let cfg = BusConfig::default()
            .url("memory://test")
            .prefetch(1)
            .dead_letter_exchange(None::<String>)
            .default_format(Format::Bincode);
        assert_eq!(cfg.url, "memory://test");
        assert_eq!(cfg.prefetch, 1);
        assert_eq!(cfg.dead_letter_exchange, None);
        assert_eq!(cfg.default_format, Format::Bincode);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let tmp = TempDir::new().expect("create tempdir");
        let path = tmp.path().join("perilbus.toml");
        fs::write(
            &path,
            r#"
                url = "memory://from-file"
                prefetch = 3
                default_format = "bincode"
            "#,
        )
        .expect("write config file");

        let cfg = BusConfig::load_from(&path).expect("load should succeed");
        assert_eq!(cfg.url, "memory://from-file");
        assert_eq!(cfg.prefetch, 3);
        assert_eq!(cfg.default_format, Format::Bincode);
        // Not in the file: default kept.
        assert_eq!(cfg.dead_letter_exchange.as_deref(), Some("peril_dlx"));
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let tmp = TempDir::new().expect("create tempdir");
        let err = BusConfig::load_from(tmp.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, BusError::Config(_)));
    }

    #[test]
    fn test_load_from_bad_value_fails() {
        let tmp = TempDir::new().expect("create tempdir");
        let path = tmp.path().join("perilbus.toml");
        fs::write(&path, "default_format = \"xml\"\n").expect("write config file");

        let err = BusConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, BusError::Config(_)));
    }
}
