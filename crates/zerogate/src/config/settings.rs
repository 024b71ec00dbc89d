//! Configuration file loading.
//!
//! The whole gateway is driven by a single JSON document. Loading expands
//! the top-down default chains before validating, so every consumer of a
//! loaded [`Settings`] sees concrete per-backend values.

use crate::models::settings::Settings;
use log::debug;
use std::path::Path;

/// Errors produced while loading or validating a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Loads, expands and validates the configuration document at `path`.
///
/// Defaults propagate global → route → backend before validation, so the
/// returned document always carries concrete timeouts, retry budgets and
/// backend identities.
///
/// # Errors
///
/// - [`ConfigError::Io`] when the file cannot be read
/// - [`ConfigError::Parse`] on malformed JSON or unknown enum tags
/// - [`ConfigError::Invalid`] when validation rejects the expanded document
pub fn load_settings_from_path(path: &Path) -> Result<Settings, ConfigError> {
    let display = path.display().to_string();

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    let mut settings: Settings =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display.clone(),
            source,
        })?;

    settings.apply_defaults();
    settings.validate().map_err(ConfigError::Invalid)?;

    debug!(
        "Loaded configuration from {} with {} routes",
        display,
        settings.routes.len()
    );

    Ok(settings)
}
