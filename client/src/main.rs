//! `tunl` entry point: parse arguments, run the forwarder, map the outcome
//! to a process exit code.

mod backoff;
mod cli;
mod forwarder;

use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // `--help`/`--version` exit 0 like clap's own default; any
            // actual parse failure (bad port, unknown flag, ...) maps to
            // the invalid-arguments exit code, not clap's default of 2.
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    match forwarder::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tunl: {e}");
            ExitCode::FAILURE
        }
    }
}
