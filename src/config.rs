//! Middleware configuration.
//!
//! [`Config`] derives `Deserialize`, so a host can pull it out of whatever
//! configuration source it already loads. [`Config::from_env`] covers the
//! common case of a handful of environment variables:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `BULWARK_DETAILED_ERRORS` | `detailed_errors` | `false` |
//! | `BULWARK_LOG` | `log.filter` | `info` |
//! | `BULWARK_LOG_FORMAT` | `log.format` (`json` / `text`) | `json` |

use serde::Deserialize;

use crate::logging::{LogConfig, LogFormat};

pub const DETAILED_ERRORS_VAR: &str = "BULWARK_DETAILED_ERRORS";
pub const LOG_FILTER_VAR: &str = "BULWARK_LOG";
pub const LOG_FORMAT_VAR: &str = "BULWARK_LOG_FORMAT";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Put the failure text in 500 responses instead of a generic message.
    pub detailed_errors: bool,
    pub log: LogConfig,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(DETAILED_ERRORS_VAR) {
            config.detailed_errors = parse_flag(&value)
                .ok_or(ConfigError::InvalidValue { key: DETAILED_ERRORS_VAR, value })?;
        }
        if let Some(value) = lookup(LOG_FILTER_VAR) {
            config.log.filter = value;
        }
        if let Some(value) = lookup(LOG_FORMAT_VAR) {
            config.log.format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                _ => return Err(ConfigError::InvalidValue { key: LOG_FORMAT_VAR, value }),
            };
        }
        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_keys_use_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            (DETAILED_ERRORS_VAR, "TRUE"),
            (LOG_FILTER_VAR, "debug"),
            (LOG_FORMAT_VAR, "Text"),
        ]))
        .unwrap();
        assert!(config.detailed_errors);
        assert_eq!(config.log.filter, "debug");
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn rejects_garbage() {
        let err = Config::from_lookup(lookup(&[(DETAILED_ERRORS_VAR, "sometimes")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue { key: DETAILED_ERRORS_VAR, value: "sometimes".into() });

        assert!(Config::from_lookup(lookup(&[(LOG_FORMAT_VAR, "xml")])).is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: Config = serde_json::from_str(r#"{"detailed_errors":true}"#).unwrap();
        assert!(config.detailed_errors);
        assert_eq!(config.log, LogConfig::default());
    }
}
