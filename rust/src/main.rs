//! Operator CLI: generate keys, produce `ENC(...)` markers and inspect how a
//! settings file decrypts. Decrypted values are redacted unless asked for.

use anyhow::{bail, Context};
use clap::Parser;
use enc_settings::bootstrap::{enc, enc_with_key, new_key};
use enc_settings::cli::{CheckOpts, Cli, Commands, DecryptOpts, EncryptOpts};
use enc_settings::config::{load_settings, read_settings, LoaderConfig};
use enc_settings::logging;
use enc_settings::settings::{EnvPrefix, SettingValue, Settings};
use tracing::info;

const REDACTED: &str = "<redacted>";

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::NewKey => println!("{}", new_key()),
        Commands::Encrypt(opts) => encrypt(cli.prefix, opts)?,
        Commands::Decrypt(opts) => decrypt(cli.prefix, opts)?,
        Commands::Check(opts) => check(cli.prefix, opts)?,
    }

    Ok(())
}

fn encrypt(prefix: EnvPrefix, opts: EncryptOpts) -> anyhow::Result<()> {
    let marker = match (&opts.key, &opts.settings) {
        (Some(key), _) => enc_with_key(Some(key.as_str()), &opts.value)?,
        (None, Some(path)) => {
            let settings = read_settings(path, prefix).with_context(|| format!("reading {}", path.display()))?;
            enc(&settings, &opts.value)?
        }
        (None, None) => enc(&Settings::new(prefix, Default::default()), &opts.value)?,
    };

    match marker {
        Some(marker) => println!("{marker}"),
        None => bail!("no decryption key available; set DECRYPT_KEY or pass --key"),
    }
    Ok(())
}

fn decrypt(prefix: EnvPrefix, opts: DecryptOpts) -> anyhow::Result<()> {
    let config = LoaderConfig {
        envvar_prefix: prefix,
        silent: !opts.strict,
        single_key: opts.only,
    };
    let (mut settings, report) =
        load_settings(&opts.file, &config).with_context(|| format!("loading {}", opts.file.display()))?;

    if !opts.reveal {
        for path in &report.decrypted {
            if let Some(value) = settings.tree.get_path_mut(path.segments()) {
                *value = SettingValue::Text(REDACTED.to_string());
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&settings.tree)?);
    Ok(())
}

fn check(prefix: EnvPrefix, opts: CheckOpts) -> anyhow::Result<()> {
    let config = LoaderConfig {
        envvar_prefix: prefix,
        ..LoaderConfig::default()
    };
    let (_, report) =
        load_settings(&opts.file, &config).with_context(|| format!("loading {}", opts.file.display()))?;

    let Some(tier) = report.key_tier else {
        bail!("no decryption key available; markers in {} stay encrypted", opts.file.display());
    };
    info!(source = %tier, "decryption key found");

    for path in &report.decrypted {
        println!("ok      {path}");
    }
    for path in &report.failed {
        println!("failed  {path}");
    }

    if !report.failed.is_empty() {
        bail!("{} setting(s) could not be decrypted", report.failed.len());
    }
    Ok(())
}
