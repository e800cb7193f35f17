//! Settings decryption engine.
//!
//! A load resolves one decryption key, then walks the settings tree (or a
//! single top-level entry) and replaces every `ENC(...)` marker with its
//! plaintext. With no key available the tree is left exactly as it was, so
//! secrets can stay encrypted while a key is still being provisioned.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::crypto::marker::marker_payload;
use crate::crypto::secrets::{CipherError, SecretCipher};
use crate::env::{EnvSource, ProcessEnv};
use crate::settings::{EnvPrefix, SettingPath, SettingValue, Settings, SettingsTree, DECRYPT_KEY_VAR};

/// Where the active decryption key was found, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTier {
    PrefixedEnv,
    Env,
    PrefixedSetting,
    Setting,
}

impl KeyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyTier::PrefixedEnv => "prefixed environment variable",
            KeyTier::Env => "environment variable",
            KeyTier::PrefixedSetting => "prefixed setting",
            KeyTier::Setting => "setting",
        }
    }
}

impl fmt::Display for KeyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved decryption key together with its origin.
pub struct KeySource {
    pub tier: KeyTier,
    /// Variable or setting name the key was read from.
    pub name: String,
    value: String,
}

impl KeySource {
    fn new(tier: KeyTier, name: &str, value: String) -> Self {
        Self {
            tier,
            name: name.to_string(),
            value,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySource")
            .field("tier", &self.tier)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl Drop for KeySource {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

/// Finds the decryption key, first match wins:
/// 1. `<PREFIX>_DECRYPT_KEY` in the environment
/// 2. `DECRYPT_KEY` in the environment
/// 3. `<PREFIX>_DECRYPT_KEY` in the settings tree
/// 4. `DECRYPT_KEY` in the settings tree
///
/// With the prefix disabled, tiers 1 and 3 are skipped. No key is a normal
/// outcome, not an error.
pub fn resolve_decryption_key<E>(settings: &Settings, env: &E) -> Option<KeySource>
where
    E: EnvSource + ?Sized,
{
    let prefixed = match &settings.envvar_prefix {
        EnvPrefix::Named(_) => Some(settings.envvar_prefix.decrypt_key_var()),
        EnvPrefix::Disabled => None,
    };

    // The environment goes first: hosts usually merge environment-derived
    // settings into the tree after this runs.
    if let Some(prefixed) = &prefixed {
        if let Some(value) = env.var(prefixed) {
            return Some(KeySource::new(KeyTier::PrefixedEnv, prefixed, value));
        }
    }
    if let Some(value) = env.var(DECRYPT_KEY_VAR) {
        return Some(KeySource::new(KeyTier::Env, DECRYPT_KEY_VAR, value));
    }
    if let Some(prefixed) = &prefixed {
        if let Some(value) = setting_text(&settings.tree, prefixed) {
            return Some(KeySource::new(KeyTier::PrefixedSetting, prefixed, value));
        }
    }
    if let Some(value) = setting_text(&settings.tree, DECRYPT_KEY_VAR) {
        return Some(KeySource::new(KeyTier::Setting, DECRYPT_KEY_VAR, value));
    }
    None
}

fn setting_text(tree: &SettingsTree, name: &str) -> Option<String> {
    match tree.get(name)? {
        SettingValue::Text(value) => Some(value.clone()),
        _ => {
            warn!(setting = name, "ignoring decryption key setting that is not text");
            None
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to decrypt setting `{path}`: {source}")]
pub struct DecryptError {
    pub path: SettingPath,
    pub source: CipherError,
}

/// What a single load did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// `None` when no key was available and nothing was touched.
    pub key_tier: Option<KeyTier>,
    pub decrypted: Vec<SettingPath>,
    /// Markers left in place because they could not be decrypted.
    pub failed: Vec<SettingPath>,
}

impl LoadReport {
    pub fn key_found(&self) -> bool {
        self.key_tier.is_some()
    }
}

/// Decrypts settings in place using a key resolved from `E` and the tree.
#[derive(Clone)]
pub struct SecretsLoader<E = ProcessEnv> {
    env: E,
    silent: bool,
}

impl SecretsLoader<ProcessEnv> {
    pub fn new() -> Self {
        Self::with_env(ProcessEnv)
    }
}

impl Default for SecretsLoader<ProcessEnv> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnvSource> SecretsLoader<E> {
    /// Silent by default: undecryptable markers are kept and loading goes on.
    pub fn with_env(env: E) -> Self {
        Self { env, silent: true }
    }

    /// With `silent` off, the first undecryptable marker aborts the load.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn resolve_key(&self, settings: &Settings) -> Option<KeySource> {
        resolve_decryption_key(settings, &self.env)
    }

    /// Decrypts every marker in `settings`, or only the top-level entry
    /// `single_key` when given. Siblings of that entry are never touched.
    pub fn load(&self, settings: &mut Settings, single_key: Option<&str>) -> Result<LoadReport, DecryptError> {
        let Some(source) = self.resolve_key(settings) else {
            debug!("no decryption key available; settings left as-is");
            return Ok(LoadReport::default());
        };
        debug!(source = %source.tier, variable = %source.name, "resolved decryption key");

        let mut walk = Walk {
            cipher: SecretCipher::from_text(source.value()),
            silent: self.silent,
            decrypted: Vec::new(),
            failed: Vec::new(),
        };
        match single_key {
            Some(name) => walk.entry(&mut settings.tree, name)?,
            None => walk.tree(&mut settings.tree, &SettingPath::root())?,
        }

        let report = LoadReport {
            key_tier: Some(source.tier),
            decrypted: walk.decrypted,
            failed: walk.failed,
        };
        info!(
            decrypted = report.decrypted.len(),
            failed = report.failed.len(),
            "settings decryption finished"
        );
        Ok(report)
    }
}

struct Walk {
    // A malformed key only surfaces once a marker needs it.
    cipher: Result<SecretCipher, CipherError>,
    silent: bool,
    decrypted: Vec<SettingPath>,
    failed: Vec<SettingPath>,
}

impl Walk {
    fn entry(&mut self, tree: &mut SettingsTree, name: &str) -> Result<(), DecryptError> {
        let path = SettingPath::root().child(name);
        match tree.get_mut(name) {
            Some(value) => self.value(value, &path),
            None => Ok(()),
        }
    }

    fn tree(&mut self, tree: &mut SettingsTree, path: &SettingPath) -> Result<(), DecryptError> {
        for (key, value) in tree.iter_mut() {
            self.value(value, &path.child(key))?;
        }
        Ok(())
    }

    fn value(&mut self, value: &mut SettingValue, path: &SettingPath) -> Result<(), DecryptError> {
        match value {
            SettingValue::Tree(tree) => self.tree(tree, path),
            SettingValue::Text(text) => self.text(text, path),
            SettingValue::Other(_) => Ok(()),
        }
    }

    fn text(&mut self, text: &mut String, path: &SettingPath) -> Result<(), DecryptError> {
        let Some(token) = marker_payload(text) else {
            return Ok(());
        };
        match self.decrypt(token) {
            Ok(plaintext) => {
                *text = plaintext;
                debug!(setting = %path, "decrypted setting");
                self.decrypted.push(path.clone());
                Ok(())
            }
            Err(source) if self.silent => {
                warn!(setting = %path, error = %source, "leaving encrypted setting in place");
                self.failed.push(path.clone());
                Ok(())
            }
            Err(source) => Err(DecryptError {
                path: path.clone(),
                source,
            }),
        }
    }

    fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let cipher = self.cipher.as_ref().map_err(Clone::clone)?;
        let plaintext = cipher.decrypt(token)?;
        String::from_utf8(plaintext).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            CipherError::InvalidValue("decrypted value is not valid UTF-8".to_string())
        })
    }
}

/// Entry point with the shape configuration hosts call back into. `env` and
/// `filename` are accepted for compatibility and ignored; `key` limits the
/// load to one top-level entry.
pub fn load(
    settings: &mut Settings,
    _env: Option<&str>,
    silent: bool,
    key: Option<&str>,
    _filename: Option<&Path>,
) -> Result<(), DecryptError> {
    SecretsLoader::new().silent(silent).load(settings, key).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::secrets::{encrypt_with_key, generate_key};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn settings(prefix: EnvPrefix, value: Value) -> Settings {
        Settings::new(prefix, SettingsTree::try_from(value).expect("fixture is an object"))
    }

    fn enc(key: &str, plaintext: &str) -> String {
        encrypt_with_key(Some(key), plaintext)
            .expect("encryption should succeed")
            .expect("key was provided")
    }

    fn tree_json(settings: &Settings) -> Value {
        Value::from(settings.tree.clone())
    }

    #[test]
    fn prefixed_environment_wins() {
        let vars = env(&[("APP_DECRYPT_KEY", "prefixed"), ("DECRYPT_KEY", "plain")]);
        let settings = settings(
            EnvPrefix::named("APP"),
            json!({ "APP_DECRYPT_KEY": "tree-prefixed", "DECRYPT_KEY": "tree-plain" }),
        );
        let source = resolve_decryption_key(&settings, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::PrefixedEnv);
        assert_eq!(source.name, "APP_DECRYPT_KEY");
        assert_eq!(source.value(), "prefixed");
    }

    #[test]
    fn environment_beats_settings() {
        let vars = env(&[("DECRYPT_KEY", "plain")]);
        let settings = settings(EnvPrefix::named("APP"), json!({ "APP_DECRYPT_KEY": "tree-prefixed" }));
        let source = resolve_decryption_key(&settings, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Env);
        assert_eq!(source.value(), "plain");
    }

    #[test]
    fn settings_used_without_environment() {
        let vars = env(&[]);
        let both = settings(
            EnvPrefix::named("APP"),
            json!({ "APP_DECRYPT_KEY": "tree-prefixed", "DECRYPT_KEY": "tree-plain" }),
        );
        let source = resolve_decryption_key(&both, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::PrefixedSetting);
        assert_eq!(source.value(), "tree-prefixed");

        let plain_only = settings(EnvPrefix::named("APP"), json!({ "DECRYPT_KEY": "tree-plain" }));
        let source = resolve_decryption_key(&plain_only, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Setting);
        assert_eq!(source.value(), "tree-plain");
    }

    #[test]
    fn disabled_prefix_uses_plain_name_everywhere() {
        let vars = env(&[("APP_DECRYPT_KEY", "ignored")]);
        let settings = settings(EnvPrefix::Disabled, json!({ "DECRYPT_KEY": "tree-plain" }));
        let source = resolve_decryption_key(&settings, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Setting);
        assert_eq!(source.name, "DECRYPT_KEY");
        assert_eq!(source.value(), "tree-plain");

        let vars = env(&[("DECRYPT_KEY", "env-plain")]);
        let source = resolve_decryption_key(&settings, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Env);
        assert_eq!(source.value(), "env-plain");
    }

    #[test]
    fn non_text_key_setting_is_skipped() {
        let settings = settings(
            EnvPrefix::named("APP"),
            json!({ "APP_DECRYPT_KEY": 42, "DECRYPT_KEY": "tree-plain" }),
        );
        let source = resolve_decryption_key(&settings, &env(&[])).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Setting);
    }

    #[test]
    fn empty_environment_value_still_counts() {
        let vars = env(&[("DECRYPT_KEY", "")]);
        let settings = settings(EnvPrefix::Disabled, json!({ "DECRYPT_KEY": "tree-plain" }));
        let source = resolve_decryption_key(&settings, &vars).expect("key should resolve");
        assert_eq!(source.tier, KeyTier::Env);
        assert_eq!(source.value(), "");
    }

    #[test]
    fn decrypts_markers_written_by_python_fernet() {
        // Written with `cryptography.fernet.Fernet(key).encrypt(b"hello")`.
        let key = "gBM6ytkZQMmi3MVcQh_IxJtpGfNosrv3g4-AvhwlDtI=";
        let token = "gAAAAABq1jst5qe6F5pm58AILKw0HU7Le3VBuuxDVPpg_ADN7gy4xWTAR9LYQv4FKGTGqwRG71JA6aIlHfaX6JldF7MpmzwM-Q==";
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({ "db": { "password": format!("ENC({token})") } }),
        );
        let report = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key)]))
            .silent(false)
            .load(&mut settings, None)
            .expect("python token should decrypt");
        assert_eq!(report.key_tier, Some(KeyTier::Env));
        assert_eq!(tree_json(&settings), json!({ "db": { "password": "hello" } }));
    }

    #[test]
    fn missing_key_is_a_no_op() {
        let fixture = json!({ "a": { "b": "ENC(X)" }, "n": 1 });
        let mut settings = settings(EnvPrefix::named("APP"), fixture.clone());
        let report = SecretsLoader::with_env(env(&[]))
            .silent(false)
            .load(&mut settings, None)
            .expect("no key is not an error");
        assert!(!report.key_found());
        assert_eq!(tree_json(&settings), fixture);
    }

    #[test]
    fn debug_output_hides_key() {
        let settings = settings(EnvPrefix::Disabled, json!({}));
        let source = resolve_decryption_key(&settings, &env(&[("DECRYPT_KEY", "super-secret")]))
            .expect("key should resolve");
        let printed = format!("{source:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn decrypts_nested_markers_in_place() {
        let key = generate_key();
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({
                "a": { "b": enc(&key, "hunter2"), "deeper": { "c": enc(&key, "ünïcode") } },
                "top": enc(&key, "plain-top"),
                "port": 5432,
                "enabled": true,
                "list": [enc(&key, "in-list")],
                "nothing": null,
                "text": "not a marker"
            }),
        );
        let before = tree_json(&settings);

        let report = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .load(&mut settings, None)
            .expect("load should succeed");

        let after = tree_json(&settings);
        assert_eq!(after["a"]["b"], "hunter2");
        assert_eq!(after["a"]["deeper"]["c"], "ünïcode");
        assert_eq!(after["top"], "plain-top");
        assert_eq!(after["port"], before["port"]);
        assert_eq!(after["enabled"], before["enabled"]);
        assert_eq!(after["list"], before["list"]);
        assert_eq!(after["nothing"], Value::Null);
        assert_eq!(after["text"], "not a marker");
        assert_eq!(report.key_tier, Some(KeyTier::Env));
        assert_eq!(report.decrypted.len(), 3);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn second_load_changes_nothing() {
        let key = generate_key();
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({ "a": { "b": enc(&key, "value") }, "c": "ENC(garbage)" }),
        );
        let loader = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]));
        loader.load(&mut settings, None).expect("first load");
        let once = tree_json(&settings);
        let report = loader.load(&mut settings, None).expect("second load");
        assert_eq!(tree_json(&settings), once);
        assert!(report.decrypted.is_empty());
    }

    #[test]
    fn silent_mode_keeps_bad_markers_and_continues() {
        let key = generate_key();
        let other = generate_key();
        let foreign = enc(&other, "not ours");
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({ "a": { "b": foreign.clone() }, "z": enc(&key, "ours") }),
        );

        let report = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .load(&mut settings, None)
            .expect("silent load never fails");

        let after = tree_json(&settings);
        assert_eq!(after["a"]["b"], foreign);
        assert_eq!(after["z"], "ours");
        assert_eq!(report.failed, vec![SettingPath::from_iter(["a", "b"])]);
        assert_eq!(report.decrypted, vec![SettingPath::from_iter(["z"])]);
    }

    #[test]
    fn strict_mode_aborts_on_first_failure() {
        let key = generate_key();
        let mut settings = settings(EnvPrefix::Disabled, json!({ "a": { "b": "ENC(X)" } }));

        let err = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .silent(false)
            .load(&mut settings, None)
            .unwrap_err();

        assert_eq!(err.path.to_string(), "a.b");
        assert_eq!(err.source, CipherError::InvalidToken);
        assert_eq!(tree_json(&settings)["a"]["b"], "ENC(X)");
        assert!(err.to_string().contains("`a.b`"));
    }

    #[test]
    fn malformed_key_only_fails_when_a_marker_needs_it() {
        let vars = env(&[("DECRYPT_KEY", "not-a-key")]);
        let mut clean = settings(EnvPrefix::Disabled, json!({ "a": "plain" }));
        SecretsLoader::with_env(vars.clone())
            .silent(false)
            .load(&mut clean, None)
            .expect("no markers, nothing to decrypt");

        let mut marked = settings(EnvPrefix::Disabled, json!({ "a": "ENC(X)" }));
        let err = SecretsLoader::with_env(vars.clone())
            .silent(false)
            .load(&mut marked, None)
            .unwrap_err();
        assert!(matches!(err.source, CipherError::InvalidValue(_)));

        let report = SecretsLoader::with_env(vars)
            .load(&mut marked, None)
            .expect("silent load never fails");
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn single_key_leaves_siblings_alone() {
        let key = generate_key();
        let sibling = enc(&key, "sibling");
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({ "a": enc(&key, "chosen"), "b": sibling.clone(), "c": { "d": sibling.clone() } }),
        );

        let report = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .load(&mut settings, Some("a"))
            .expect("load should succeed");

        let after = tree_json(&settings);
        assert_eq!(after["a"], "chosen");
        assert_eq!(after["b"], sibling);
        assert_eq!(after["c"]["d"], sibling);
        assert_eq!(report.decrypted, vec![SettingPath::from_iter(["a"])]);
    }

    #[test]
    fn single_key_walks_a_nested_entry() {
        let key = generate_key();
        let mut settings = settings(
            EnvPrefix::Disabled,
            json!({ "db": { "password": enc(&key, "pw") }, "other": enc(&key, "x") }),
        );
        SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .load(&mut settings, Some("db"))
            .expect("load should succeed");
        let after = tree_json(&settings);
        assert_eq!(after["db"]["password"], "pw");
        assert!(after["other"].as_str().is_some_and(|v| v.starts_with("ENC(")));
    }

    #[test]
    fn single_key_missing_entry_is_fine() {
        let key = generate_key();
        let fixture = json!({ "a": "ENC(X)" });
        let mut settings = settings(EnvPrefix::Disabled, fixture.clone());
        let report = SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .silent(false)
            .load(&mut settings, Some("missing"))
            .expect("absent entry is skipped");
        assert!(report.decrypted.is_empty());
        assert_eq!(tree_json(&settings), fixture);
    }

    #[test]
    fn key_from_tree_decrypts_tree() {
        let key = generate_key();
        let mut settings = settings(
            EnvPrefix::named("SVC"),
            json!({ "SVC_DECRYPT_KEY": key.clone(), "token": enc(&key, "t0k3n") }),
        );
        let report = SecretsLoader::with_env(env(&[]))
            .silent(false)
            .load(&mut settings, None)
            .expect("load should succeed");
        assert_eq!(report.key_tier, Some(KeyTier::PrefixedSetting));
        assert_eq!(tree_json(&settings)["token"], "t0k3n");
        assert_eq!(tree_json(&settings)["SVC_DECRYPT_KEY"], key);
    }

    #[test]
    fn malformed_markers_are_left_alone() {
        let key = generate_key();
        let fixture = json!({ "a": "ENCX)", "b": "enc(X)", "c": "ENC(X" });
        let mut settings = settings(EnvPrefix::Disabled, fixture.clone());
        SecretsLoader::with_env(env(&[("DECRYPT_KEY", key.as_str())]))
            .silent(false)
            .load(&mut settings, None)
            .expect("nothing to decrypt");
        assert_eq!(tree_json(&settings), fixture);
    }
}
