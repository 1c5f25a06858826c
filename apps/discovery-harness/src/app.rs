use device_discovery::{DiscoveryConfig, DiscoveryContext};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::cases::{run_case, standard_cases, DeviceCase, SOFTWARE_DEVICES};
use crate::cli::{HarnessCli, BROADCASTER_BINARY};
use crate::error::HarnessError;
use crate::remote::{RemoteOptions, RemoteSession};
use crate::scenario::{RunSummary, ScenarioRunner};

/// Full harness run: open the context, bring up the broadcaster, run every
/// case, tear everything down and report.
pub async fn run(cli: HarnessCli) -> Result<RunSummary, HarnessError> {
    let program = resolve_broadcaster(cli.broadcaster.as_deref())?;
    let context = DiscoveryContext::open(
        DiscoveryConfig::new(cli.domain, cli.participant.clone()),
        SOFTWARE_DEVICES,
    )
    .await?;

    let options = RemoteOptions::default()
        .with_args([
            "--domain".to_string(),
            cli.domain.to_string(),
            "--log-level".to_string(),
            cli.logging.level.as_str().to_string(),
        ])
        .with_tag(cli.nested_tag.clone())
        .with_ready_timeout(cli.ready_timeout());

    let runner = run_cases(
        &context,
        &program,
        options,
        &standard_cases(),
        cli.discovery_timeout(),
    )
    .await;
    context.close();
    Ok(runner?.print_results())
}

/// Runs `cases` against a freshly started remote. Only launch and readiness
/// failures are returned as errors; everything else lands in the runner.
pub async fn run_cases(
    context: &DiscoveryContext,
    program: &Path,
    options: RemoteOptions,
    cases: &[DeviceCase],
    deadline: Duration,
) -> Result<ScenarioRunner, HarnessError> {
    let mut remote = RemoteSession::start(program, options)?;
    let ready = remote.wait_until_ready().await?;
    if ready.domain != context.domain() {
        warn!(
            target: "harness::remote",
            remote_domain = ready.domain,
            domain = context.domain(),
            "remote reports a different domain"
        );
    }

    let mut runner = ScenarioRunner::new();
    for case in cases {
        run_case(&mut runner, &mut remote, context, case, deadline).await;
    }

    match remote.close().await {
        Ok(status) => info!(target: "harness::remote", %status, "remote closed"),
        Err(err) => warn!(target: "harness::remote", error = %err, "remote did not close cleanly"),
    }
    Ok(runner)
}

/// The explicit path if one was given, otherwise the broadcaster installed
/// next to the running executable.
pub fn resolve_broadcaster(explicit: Option<&Path>) -> Result<PathBuf, HarnessError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe().map_err(|err| HarnessError::BroadcasterPath(err.to_string()))?;
    let dir = exe.parent().ok_or_else(|| {
        HarnessError::BroadcasterPath(format!("{} has no parent directory", exe.display()))
    })?;
    let candidate = dir.join(format!("{BROADCASTER_BINARY}{}", std::env::consts::EXE_SUFFIX));
    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(HarnessError::BroadcasterPath(format!(
            "{} not found; pass --broadcaster",
            candidate.display()
        )))
    }
}
