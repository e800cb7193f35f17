//! Developer helpers for producing values to paste into configuration.
//! None of this runs while settings load.

use crate::crypto::secrets::{encrypt_with_key, generate_key, CipherError};
use crate::env::{EnvSource, ProcessEnv};
use crate::loader::{resolve_decryption_key, KeySource};
use crate::settings::Settings;

/// Returns a new encryption/decryption key.
pub fn new_key() -> String {
    generate_key()
}

/// Encrypts `value` with the key the loader would pick for `settings`,
/// looking at the process environment first. `Ok(None)` when no key exists.
pub fn enc(settings: &Settings, value: &str) -> Result<Option<String>, CipherError> {
    enc_with_env(settings, &ProcessEnv, value)
}

pub fn enc_with_env<E>(settings: &Settings, env: &E, value: &str) -> Result<Option<String>, CipherError>
where
    E: EnvSource + ?Sized,
{
    let key = resolve_decryption_key(settings, env);
    enc_with_key(key.as_ref().map(KeySource::value), value)
}

/// Encrypts `value` with an explicit key, producing an `ENC(...)` marker.
pub fn enc_with_key(key: Option<&str>, value: &str) -> Result<Option<String>, CipherError> {
    encrypt_with_key(key, value)
}
