//! gsbt - main entry point

use clap::Parser;
use gsbt::cli::{dispatch, Cli};
use gsbt::utils::{logger, shutdown};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = logger::level_for(cli.verbose, cli.quiet);
    if let Err(e) = logger::init(level, cli.output) {
        eprintln!("Error: failed to initialize logging: {:#}", e);
        return ExitCode::from(1);
    }

    tracing::debug!("gsbt v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());

    match dispatch(cli, cancel).await {
        Ok(status) => ExitCode::from(status.exit_code() as u8),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
