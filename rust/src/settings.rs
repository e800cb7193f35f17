//! Settings tree handed to the decryption engine by the host configuration.
//!
//! Values form a closed set of variants so traversal stays exhaustive: text
//! may carry an `ENC(...)` marker, nested trees are walked, and everything
//! else (numbers, booleans, arrays, null) passes through untouched.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Name of the decryption key, with or without the host's variable prefix.
pub const DECRYPT_KEY_VAR: &str = "DECRYPT_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Tree(SettingsTree),
    Other(Value),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&SettingsTree> {
        match self {
            SettingValue::Tree(tree) => Some(tree),
            _ => None,
        }
    }
}

impl From<Value> for SettingValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => SettingValue::Text(text),
            Value::Object(map) => SettingValue::Tree(map.into_iter().collect()),
            other => SettingValue::Other(other),
        }
    }
}

impl From<SettingValue> for Value {
    fn from(value: SettingValue) -> Self {
        match value {
            SettingValue::Text(text) => Value::String(text),
            SettingValue::Tree(tree) => tree.into(),
            SettingValue::Other(other) => other,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(text: &str) -> Self {
        SettingValue::Text(text.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(text: String) -> Self {
        SettingValue::Text(text)
    }
}

impl From<SettingsTree> for SettingValue {
    fn from(tree: SettingsTree) -> Self {
        SettingValue::Tree(tree)
    }
}

/// Mapping of unique keys to setting values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsTree {
    entries: BTreeMap<String, SettingValue>,
}

impl SettingsTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Option<SettingValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut SettingValue> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut SettingValue)> {
        self.entries.iter_mut().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follows `path` through nested trees.
    pub fn get_path(&self, path: &[String]) -> Option<&SettingValue> {
        let (first, rest) = path.split_first()?;
        let value = self.entries.get(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        value.as_tree()?.get_path(rest)
    }

    pub fn get_path_mut(&mut self, path: &[String]) -> Option<&mut SettingValue> {
        let (first, rest) = path.split_first()?;
        let value = self.entries.get_mut(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        match value {
            SettingValue::Tree(tree) => tree.get_path_mut(rest),
            _ => None,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for SettingsTree
where
    K: Into<String>,
    V: Into<SettingValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl TryFrom<Value> for SettingsTree {
    type Error = Value;

    /// Only JSON objects become trees; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(other),
        }
    }
}

impl From<SettingsTree> for Value {
    fn from(tree: SettingsTree) -> Self {
        Value::Object(
            tree.entries
                .into_iter()
                .map(|(key, value)| (key, value.into()))
                .collect(),
        )
    }
}

/// Location of a setting, as the chain of keys from the root of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SettingPath(Vec<String>);

impl SettingPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for SettingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl<S: Into<String>> FromIterator<S> for SettingPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Namespace prefix the host applies to environment-derived settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvPrefix {
    /// No prefix (the host configured a boolean); only `DECRYPT_KEY` is used.
    #[default]
    Disabled,
    Named(String),
}

impl EnvPrefix {
    pub fn named(prefix: impl Into<String>) -> Self {
        EnvPrefix::Named(prefix.into())
    }

    /// `<PREFIX>_DECRYPT_KEY`, or plain `DECRYPT_KEY` when disabled.
    pub fn decrypt_key_var(&self) -> String {
        match self {
            EnvPrefix::Disabled => DECRYPT_KEY_VAR.to_string(),
            EnvPrefix::Named(prefix) => format!("{prefix}_{DECRYPT_KEY_VAR}"),
        }
    }
}

impl FromStr for EnvPrefix {
    type Err = Infallible;

    /// Text from flags or the environment: empty, `true` and `false` disable
    /// the prefix, anything else names it.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("false")
            || trimmed.eq_ignore_ascii_case("true")
        {
            return Ok(EnvPrefix::Disabled);
        }
        Ok(EnvPrefix::Named(trimmed.to_string()))
    }
}

impl<'de> Deserialize<'de> for EnvPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawPrefix {
            // Any boolean disables the prefix.
            Flag(#[allow(dead_code)] bool),
            Name(String),
        }

        Ok(match RawPrefix::deserialize(deserializer)? {
            RawPrefix::Flag(_) => EnvPrefix::Disabled,
            RawPrefix::Name(name) => EnvPrefix::Named(name),
        })
    }
}

impl Serialize for EnvPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EnvPrefix::Disabled => serializer.serialize_bool(false),
            EnvPrefix::Named(name) => serializer.serialize_str(name),
        }
    }
}

/// Host settings object: the tree plus the host's variable-name prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub envvar_prefix: EnvPrefix,
    pub tree: SettingsTree,
}

impl Settings {
    pub fn new(envvar_prefix: EnvPrefix, tree: SettingsTree) -> Self {
        Self { envvar_prefix, tree }
    }
}
