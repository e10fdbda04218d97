//! pnetctl entry point.
//!
//! Parses the command line, initializes logging, and dispatches to the
//! command drivers. Errors map to the per-phase exit codes.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use pnetctl::{commands, Args};

/// Initialize tracing. Logs go to stderr so the device table on stdout
/// stays clean; `-v` raises the level from WARN to DEBUG.
fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let command = match args.command() {
        Ok(command) => command,
        Err(err) => {
            eprintln!("pnetctl: {err}");
            eprintln!("Try 'pnetctl -h' for more information.");
            return ExitCode::from(err.exit_code());
        }
    };

    match commands::run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
