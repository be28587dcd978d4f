use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Config file consulted when `VIGIL_CONFIG` is unset. Optional.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vigil/vigild.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which message bus to register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration: built-in defaults, then the TOML file, then
/// `VIGIL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite enrollment database.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum number of live sessions before LRU eviction.
    pub session_capacity: usize,
    /// Number of extraction worker threads.
    pub workers: usize,
    /// Deadline for a single extraction or video comparison.
    pub extract_timeout_secs: u64,
    /// Every n-th video frame is compared.
    pub video_stride: usize,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vigil");

        Self {
            db_path: data_dir.join("enrollments.db"),
            model_dir: PathBuf::from("/usr/share/vigil/models"),
            session_capacity: vigil_core::DEFAULT_CAPACITY,
            workers: std::thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
            extract_timeout_secs: 10,
            video_stride: vigil_core::DEFAULT_STRIDE,
            bus: BusKind::System,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let (path, required) = match std::env::var("VIGIL_CONFIG") {
            Ok(p) => (PathBuf::from(p), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if required || path.exists() {
            let config = Self::from_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
            config
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `VIGIL_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VIGIL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("VIGIL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "VIGIL_SESSION_CAPACITY", &mut self.session_capacity);
        env_parse(&lookup, "VIGIL_WORKERS", &mut self.workers);
        env_parse(&lookup, "VIGIL_EXTRACT_TIMEOUT_SECS", &mut self.extract_timeout_secs);
        env_parse(&lookup, "VIGIL_VIDEO_STRIDE", &mut self.video_stride);
        match lookup("VIGIL_BUS").as_deref() {
            Some("system") => self.bus = BusKind::System,
            Some("session") => self.bus = BusKind::Session,
            Some(other) => tracing::warn!(value = other, "ignoring VIGIL_BUS, expected system or session"),
            None => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_capacity == 0 {
            return Err(ConfigError::Invalid("session_capacity must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.video_stride == 0 {
            return Err(ConfigError::Invalid("video_stride must be at least 1".into()));
        }
        if self.extract_timeout_secs == 0 {
            return Err(ConfigError::Invalid("extract_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let c = Config::default();
        assert_eq!(c.session_capacity, 1024);
        assert_eq!(c.video_stride, 10);
        assert_eq!(c.bus, BusKind::System);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml("session_capacity = 16\nbus = \"session\"\n").unwrap();
        assert_eq!(c.session_capacity, 16);
        assert_eq!(c.bus, BusKind::Session);
        assert_eq!(c.extract_timeout_secs, 10);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Config::from_toml("session_capacity = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut c = Config::from_toml("workers = 8\nvideo_stride = 5\n").unwrap();
        c.apply_env(env(&[
            ("VIGIL_WORKERS", "3"),
            ("VIGIL_DB_PATH", "/var/lib/vigil/db.sqlite"),
            ("VIGIL_BUS", "session"),
        ]));
        assert_eq!(c.workers, 3);
        assert_eq!(c.video_stride, 5);
        assert_eq!(c.db_path, PathBuf::from("/var/lib/vigil/db.sqlite"));
        assert_eq!(c.bus, BusKind::Session);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let mut c = Config::default();
        c.apply_env(env(&[("VIGIL_SESSION_CAPACITY", "many"), ("VIGIL_BUS", "carrier-pigeon")]));
        assert_eq!(c.session_capacity, 1024);
        assert_eq!(c.bus, BusKind::System);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut c = Config::default();
        c.apply_env(env(&[("VIGIL_SESSION_CAPACITY", "0")]));
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }
}
