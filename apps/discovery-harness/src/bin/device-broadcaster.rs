use anyhow::{Context, Result};
use clap::Parser;
use device_discovery::{DiscoveryConfig, DiscoveryContext};
use discovery_harness::broadcaster::Broadcaster;
use discovery_harness::cli::BroadcasterCli;
use discovery_harness::telemetry::logging;
use harness_proto::ProductLine;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BroadcasterCli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialize logging")?;

    let context = DiscoveryContext::open(
        DiscoveryConfig::new(cli.domain, cli.participant.clone()),
        ProductLine::ANY | ProductLine::SW_ONLY,
    )
    .await
    .context("failed to open discovery context")?;
    let context = Arc::new(context);
    info!(
        target: "broadcaster",
        domain = cli.domain,
        participant = %cli.participant,
        interval_ms = cli.announce_interval_ms,
        "broadcaster starting"
    );

    let mut broadcaster = Broadcaster::new(Arc::clone(&context), cli.announce_interval());
    let served = tokio::select! {
        served = broadcaster.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => Some(served),
        _ = signal::ctrl_c() => None,
    };
    broadcaster.close_all().await;
    context.close();

    match served {
        Some(served) => {
            let exit = served.context("control channel failed")?;
            info!(target: "broadcaster", ?exit, "broadcaster exiting");
            Ok(())
        }
        None => {
            info!(target: "broadcaster", "interrupted; broadcaster exiting");
            // The stdin reader thread may still be parked in a blocking read
            // and would hold up runtime shutdown.
            std::process::exit(130);
        }
    }
}
