pub mod cli;
pub mod commands;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod logging;

use clap::Parser;

/// Parse the command line, run the requested registration and return the exit code
pub fn run() -> i32 {
    let cli = cli::Cli::parse();

    let _guard = logging::init_logging(cli.verbose, cli.log_file.as_deref());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gpo-pref-sync starting");

    let result = cli::execute(&cli);
    cli::report(&result, cli.json)
}
