//! MiniKdc - standalone entrypoint.
//!
//! Usage:
//!   minikdc <workdir> <config-properties-file> <keytab-file> <principal>...

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use minikdc::cli::{init_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    init_tracing();
    run(cli).await
}
