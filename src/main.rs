use clap::Parser;
use tracing_subscriber::EnvFilter;

use quarry_cli::cli::{Cli, execute};
use quarry_cli::core::user_friendly_error;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose() { "quarry_cli=debug" } else { "quarry_cli=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = execute(cli) {
        user_friendly_error(error).display();
        std::process::exit(1);
    }
}
