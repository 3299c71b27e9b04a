#![warn(missing_docs)]

//! `docmesh` operator CLI.

use anyhow::Result;
use clap::Parser;
use docmesh_mgmt::cli::Cli;
use docmesh_mgmt::telemetry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help and --version
            e.print()?;
            return Ok(());
        }
        Err(e) => {
            e.print()?;
            std::process::exit(1);
        }
    };

    telemetry::init(cli.verbose());

    let token = CancellationToken::new();
    if cli.is_continuous() {
        let interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current round");
                interrupt.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("second interrupt, exiting now");
                std::process::exit(130);
            }
        });
    }

    cli.run(token).await
}
