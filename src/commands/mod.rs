pub mod daemon;
pub mod plan;
pub mod updates;

/// Compact stderr logging for client subcommands. `RUST_LOG` overrides the
/// default `warn` level.
pub fn init_cli_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}
