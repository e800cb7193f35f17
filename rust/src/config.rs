//! Settings file loading. Files are parsed into a [`Settings`] tree and run
//! through the decryption engine so plaintext secrets only exist in memory.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::env::{EnvSource, ProcessEnv};
use crate::loader::{DecryptError, LoadReport, SecretsLoader};
use crate::settings::{EnvPrefix, Settings, SettingsTree};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file unreadable: {0}")]
    Io(String),
    #[error("settings parse failed: {0}")]
    Parse(String),
    #[error("invalid settings structure: {0}")]
    InvalidShape(String),
    #[error("unsupported settings format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Decrypt(#[from] DecryptError),
}

/// How a settings file is decrypted once read.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Prefix for `<PREFIX>_DECRYPT_KEY`; `false` disables it.
    pub envvar_prefix: EnvPrefix,
    /// Keep undecryptable markers instead of failing the load.
    pub silent: bool,
    /// Only process this top-level entry.
    pub single_key: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            envvar_prefix: EnvPrefix::Disabled,
            silent: true,
            single_key: None,
        }
    }
}

/// Reads a `.json` or `.toml` settings file without decrypting anything.
pub fn read_settings(path: impl AsRef<Path>, envvar_prefix: EnvPrefix) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;

    let value: Value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(format!("{e}")))?,
        Some("toml") => {
            let table: toml::Table = raw.parse().map_err(|e| ConfigError::Parse(format!("{e}")))?;
            toml_to_json(toml::Value::Table(table))
        }
        other => {
            return Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<no extension>").to_string(),
            ))
        }
    };

    let tree = SettingsTree::try_from(value)
        .map_err(|_| ConfigError::InvalidShape("top-level settings must be an object".into()))?;
    Ok(Settings::new(envvar_prefix, tree))
}

/// Datetimes keep their TOML text so they load as plain strings.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::String(text),
        toml::Value::Integer(number) => Value::from(number),
        toml::Value::Float(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(number.to_string())),
        toml::Value::Boolean(flag) => Value::Bool(flag),
        toml::Value::Datetime(datetime) => Value::String(datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

/// Reads a settings file and decrypts its markers, resolving the key from
/// the process environment and the file itself.
pub fn load_settings(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<(Settings, LoadReport), ConfigError> {
    load_settings_with_env(path, config, ProcessEnv)
}

pub fn load_settings_with_env<E: EnvSource>(
    path: impl AsRef<Path>,
    config: &LoaderConfig,
    env: E,
) -> Result<(Settings, LoadReport), ConfigError> {
    let mut settings = read_settings(path, config.envvar_prefix.clone())?;
    let report = SecretsLoader::with_env(env)
        .silent(config.silent)
        .load(&mut settings, config.single_key.as_deref())?;
    Ok((settings, report))
}
