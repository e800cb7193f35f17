use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber for the binary. `RUST_LOG` overrides the
/// default `enc_settings=info` filter.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("enc_settings=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
