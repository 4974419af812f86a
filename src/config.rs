//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default number of concurrently admitted transactions.
pub const DEFAULT_PARALLEL: usize = 8;

const ENV_CONFIG: &str = "DB_LOCKING_CONFIG";
const ENV_PREFIX: &str = "DB_LOCKING__";

/// Lock manager settings, read once when a manager is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Maximum number of admitted transactions (at least 1).
    pub parallel: usize,
    /// Lock the whole process instead of single databases.
    pub global_lock: bool,
    /// How long a transaction may wait for admission, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            global_lock: false,
            timeout_ms: None,
        }
    }
}

impl LockConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the `DB_LOCKING_CONFIG` env var (if set),
    /// then apply `DB_LOCKING__<field>` overrides.
    pub fn load_from_env() -> Result<Self> {
        let mut config = match env::var(ENV_CONFIG).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_overrides(env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DB_LOCKING__<field>` pairs in-place; other keys are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match field.to_ascii_lowercase().as_str() {
                "parallel" => self.parallel = parse_value(&key, value)?,
                "global_lock" => self.global_lock = parse_value(&key, value)?,
                "timeout_ms" => {
                    self.timeout_ms = match value {
                        "" => None,
                        value => Some(parse_value(&key, value)?),
                    }
                }
                _ => {
                    return Err(Error::InvalidValue {
                        key,
                        value: value.to_owned(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel == 0 {
            return Err(Error::InvalidValue {
                key: "parallel".to_owned(),
                value: "0".to_owned(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LockConfig::default();
        assert_eq!(config.parallel, DEFAULT_PARALLEL);
        assert!(!config.global_lock);
        assert_eq!(config.timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = 2\ntimeout_ms = 250").unwrap();
        let config = LockConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.parallel, 2);
        assert!(!config.global_lock);
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_load_rejects_zero_parallel() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = 0").unwrap();
        let err = LockConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "parallel"));
    }

    #[test]
    fn test_load_rejects_unknown_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "paralel = 3").unwrap();
        let err = LockConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = LockConfig::default();
        config
            .apply_overrides(vars(&[
                ("DB_LOCKING__PARALLEL", " 3 "),
                ("DB_LOCKING__global_lock", "true"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.parallel, 3);
        assert!(config.global_lock);

        let err = config
            .apply_overrides(vars(&[("DB_LOCKING__parallel", "many")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref value, .. } if value == "many"));
        let err = config
            .apply_overrides(vars(&[("DB_LOCKING__queue", "1")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "DB_LOCKING__queue"));
    }
}
