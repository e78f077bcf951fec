//! ukpack CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ukpack_cli::commands::{dispatch, load_config, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    // RUST_LOG wins; otherwise the configured level
    let fallback = config
        .as_ref()
        .map(|c| c.config().log_level.as_filter())
        .unwrap_or("warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();

    let result = match config {
        Ok(config) => dispatch(cli.command, config).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
