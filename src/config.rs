// Runtime configuration: JSON file, then environment, then CLI flags

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const ENV_DB: &str = "SHOPLEDGER_DB";
pub const ENV_BIND: &str = "SHOPLEDGER_BIND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// SQLite file. `None` selects the in-memory backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub bind: String,
    pub log_filter: String,
    pub default_currency: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            bind: "0.0.0.0:3000".into(),
            log_filter: crate::logging::DEFAULT_FILTER.into(),
            default_currency: "USD".into(),
        }
    }
}

/// Where `Config::load` got its values. Config is read before tracing is
/// set up, so callers log this once the subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => tracing::info!("config loaded from {}", path.display()),
            ConfigSource::Defaults(path) => {
                tracing::info!("config {} not found, using defaults", path.display())
            }
        }
    }
}

impl Config {
    /// Reads `path` if it exists, otherwise returns defaults.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        if path.exists() {
            let data = fs::read_to_string(path)?;
            Ok((serde_json::from_str(&data)?, ConfigSource::File(path.to_path_buf())))
        } else {
            Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())))
        }
    }

    /// Applies `SHOPLEDGER_DB` / `SHOPLEDGER_BIND` when set.
    pub fn apply_env(mut self) -> Self {
        self.apply_overrides(std::env::var(ENV_DB).ok(), std::env::var(ENV_BIND).ok());
        self
    }

    /// Overrides from flags or environment. Empty values are ignored.
    pub fn apply_overrides(&mut self, database: Option<String>, bind: Option<String>) {
        if let Some(db) = database.filter(|s| !s.is_empty()) {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(bind) = bind.filter(|s| !s.is_empty()) {
            self.bind = bind;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let (config, source) = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.database.is_none());
        assert_eq!(source, ConfigSource::Defaults(path));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_source_is_logged_at_default_level() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(crate::logging::DEFAULT_FILTER)
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let source = ConfigSource::Defaults(PathBuf::from("missing.json"));
        tracing::subscriber::with_default(subscriber, || source.log());

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("config missing.json not found, using defaults"), "{}", output);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/shopledger.json");

        let mut config = Config::default();
        config.database = Some(PathBuf::from("/tmp/shop.db"));
        config.bind = "127.0.0.1:8080".into();
        config.save(&path).unwrap();

        let (loaded, source) = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, r#"{"bind":"127.0.0.1:9000"}"#).unwrap();

        let (config, _) = Config::load(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.default_currency, "USD");
    }

    #[test]
    fn test_overrides_ignore_empty() {
        let mut config = Config::default();
        config.apply_overrides(Some(String::new()), Some("127.0.0.1:1".into()));
        assert!(config.database.is_none());
        assert_eq!(config.bind, "127.0.0.1:1");
    }
}
