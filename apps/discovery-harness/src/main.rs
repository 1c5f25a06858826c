use clap::Parser;
use discovery_harness::app;
use discovery_harness::cli::HarnessCli;
use discovery_harness::error::HarnessError;
use discovery_harness::scenario::EXIT_FATAL;
use discovery_harness::telemetry::logging;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = HarnessCli::parse();
    if let Err(err) = logging::init(&cli.logging.to_config()) {
        eprintln!("error: {}", HarnessError::from(err));
        return ExitCode::from(EXIT_FATAL);
    }

    match app::run(cli).await {
        Ok(summary) => summary.exit_code(),
        Err(err) => {
            error!(target: "harness", error = %err, "run aborted");
            eprintln!("error: {err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
