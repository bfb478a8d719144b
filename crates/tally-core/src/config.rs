//! Helpers shared by the server and agent configuration layers.

use crate::ConfigError;
use humanize_rs::ParseError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Parse a human duration such as `10s`, `2m` or `1h30m`.
///
/// A bare number is taken as seconds, so `0` and `300` are accepted too.
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let text = text.trim();
    match humanize_rs::duration::parse(text) {
        Ok(d) => Ok(d),
        Err(ParseError::MissingUnit) => {
            if let Ok(secs) = u64::from_str(text) {
                Ok(Duration::from_secs(secs))
            } else if let Ok(secs) = f64::from_str(text) {
                Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::Duration(text.to_string()))
            } else {
                Err(ConfigError::Duration(text.to_string()))
            }
        }
        Err(_) => Err(ConfigError::Duration(text.to_string())),
    }
}

/// Serde adapter for `Option<Duration>` fields written as strings or numbers
pub mod humanized {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(text)) => parse_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Read and parse a YAML (or JSON) configuration file
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
