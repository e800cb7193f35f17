//! Encrypted settings values. Strings of the form `ENC(<token>)` embedded in
//! application configuration are decrypted in place when settings load, with
//! a single key resolved from the environment or the settings themselves.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod env;
pub mod loader;
pub mod logging;
pub mod settings;

pub use loader::{load, resolve_decryption_key, DecryptError, LoadReport, SecretsLoader};
pub use settings::{EnvPrefix, SettingValue, Settings, SettingsTree};
