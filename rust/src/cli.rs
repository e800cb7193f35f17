use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::settings::EnvPrefix;

#[derive(Parser)]
#[command(name = "enc-settings", version, about = "Encrypted values for application settings")]
pub struct Cli {
    /// Variable prefix for `<PREFIX>_DECRYPT_KEY`; empty or `false` disables it.
    #[arg(long, global = true, env = "ENC_SETTINGS_PREFIX", default_value = "")]
    pub prefix: EnvPrefix,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a new encryption/decryption key.
    NewKey,
    /// Encrypt a value into an `ENC(...)` marker.
    Encrypt(EncryptOpts),
    /// Decrypt a settings file and print it as JSON.
    Decrypt(DecryptOpts),
    /// Report which settings in a file decrypt with the available key.
    Check(CheckOpts),
}

#[derive(clap::Args)]
pub struct EncryptOpts {
    pub value: String,
    /// Key to encrypt with instead of resolving one.
    #[arg(short, long, conflicts_with = "settings")]
    pub key: Option<String>,
    /// Settings file consulted for the key after the environment.
    #[arg(short, long)]
    pub settings: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct DecryptOpts {
    pub file: PathBuf,
    /// Only decrypt this top-level entry.
    #[arg(long)]
    pub only: Option<String>,
    /// Fail on the first marker that cannot be decrypted.
    #[arg(long)]
    pub strict: bool,
    /// Print decrypted values instead of redacting them.
    #[arg(long)]
    pub reveal: bool,
}

#[derive(clap::Args)]
pub struct CheckOpts {
    pub file: PathBuf,
}
