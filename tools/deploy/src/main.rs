use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use deploy::app;
use deploy::cli::Cli;
use deploy::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let log_path = logging::init();
    tracing::debug!(log_path = %log_path.display(), "deploy logging initialized");

    let cli = Cli::parse();
    app::run(cli).await
}
