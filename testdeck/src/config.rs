// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dashboard configuration, loaded from TOML.
//!
//! ```toml
//! [filter]
//! debounce = "500ms"
//!
//! [events]
//! capacity = 1024
//!
//! [diagnostics]
//! show = false
//! ```
//!
//! Every section and key is optional. Unknown keys are ignored with a warning.

use crate::{
    debounce::DEFAULT_DEBOUNCE_PERIOD, errors::ConfigError, store::DEFAULT_EVENT_CAPACITY,
};
use camino::Utf8Path;
use serde::Deserialize;
use std::{collections::BTreeSet, io, time::Duration};
use tracing::{debug, warn};

/// Configuration for a [`Dashboard`](crate::dashboard::Dashboard).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DashboardConfig {
    /// Filter settings.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Event channel settings.
    #[serde(default)]
    pub events: EventConfig,

    /// Executor diagnostics settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// The `[filter]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct FilterConfig {
    /// How long filter input must be quiet before it is applied.
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
        }
    }
}

fn default_debounce() -> Duration {
    DEFAULT_DEBOUNCE_PERIOD
}

/// The `[events]` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct EventConfig {
    /// Per-subscriber buffer size for store, run and view events.
    ///
    /// Store subscribers that fall further behind resynchronize from a snapshot.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// The `[diagnostics]` section.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DiagnosticsConfig {
    /// Whether diagnostic messages from the executor are logged and published.
    #[serde(default)]
    pub show: bool,
}

impl DashboardConfig {
    /// Loads config from `path`.
    ///
    /// A missing file yields the default config. Unknown keys are logged as warnings.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigError> {
        debug!("dashboard config: attempting to load from {path}");
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("dashboard config: file does not exist at {path}, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    error,
                });
            }
        };

        let (config, unknown) =
            Self::deserialize_toml(&contents).map_err(|error| ConfigError::Parse {
                path: path.to_owned(),
                error,
            })?;
        if !unknown.is_empty() {
            warn_unknown_keys(path, &unknown);
        }

        debug!("dashboard config: loaded successfully from {path}");
        Ok(config)
    }

    /// Parses config from a TOML string, returning it along with any unknown keys.
    pub fn parse(contents: &str) -> Result<(Self, BTreeSet<String>), toml::de::Error> {
        Self::deserialize_toml(contents)
    }

    fn deserialize_toml(contents: &str) -> Result<(Self, BTreeSet<String>), toml::de::Error> {
        let deserializer = toml::Deserializer::parse(contents)?;
        let mut unknown = BTreeSet::new();
        let config: DashboardConfig = serde_ignored::deserialize(deserializer, |path| {
            unknown.insert(path.to_string());
        })?;
        Ok((config, unknown))
    }
}

fn warn_unknown_keys(path: &Utf8Path, unknown: &BTreeSet<String>) {
    let mut unknown_str = String::new();
    if let (1, Some(key)) = (unknown.len(), unknown.first()) {
        // Print this on the same line.
        unknown_str.push_str("key: ");
        unknown_str.push_str(key);
    } else {
        unknown_str.push_str("keys:\n");
        for key in unknown {
            unknown_str.push_str("\n  - ");
            unknown_str.push_str(key);
        }
    }

    warn!("in dashboard config file {path}, ignoring unknown configuration {unknown_str}");
}
