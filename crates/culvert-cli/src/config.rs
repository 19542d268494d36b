//! Configuration file support
//!
//! A config file supplies service mappings and default timeouts so they do
//! not have to be repeated on every invocation:
//!
//! ```toml
//! [services]
//! engine = "/run/engine.sock"
//! metrics = "/run/metrics.sock"
//!
//! [timeouts]
//! dial = 2
//! request = 10
//! response_header = 10
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Service name to pipe path mappings
    #[serde(default)]
    pub services: HashMap<String, String>,

    /// Default timeouts, in whole seconds
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Default, Deserialize)]
pub struct Timeouts {
    #[serde(default, with = "duration_secs_opt")]
    pub dial: Option<Duration>,
    #[serde(default, with = "duration_secs_opt")]
    pub request: Option<Duration>,
    #[serde(default, with = "duration_secs_opt")]
    pub response_header: Option<Duration>,
}

impl ConfigFile {
    /// Load a config file from disk.
    pub fn load(path: &Path) -> Result<ConfigFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

/// Serde helper for optional durations expressed as whole seconds.
mod duration_secs_opt {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
