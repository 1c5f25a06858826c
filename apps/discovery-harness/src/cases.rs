//! The device-properties scenarios: broadcast one simulated camera, discover
//! it, check it against its fixture, close it again.

use device_discovery::{ChangeWatch, DeviceChange, DiscoveredDevice, DiscoveryContext};
use device_fixtures::{DeviceModel, MOTION_MODULE, RGB_CAMERA, STEREO_MODULE};
use harness_proto::{DeviceInfo, ProductLine, RemoteCommand};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ScenarioError;
use crate::remote::RemoteSession;
use crate::scenario::{guarded, Scenario, ScenarioRunner, ScenarioStatus};
use crate::verify::{verify, DeviceFixture};

/// Name the remote binds each scenario's broadcast to.
pub const BIND_NAME: &str = "instance";

/// Software-simulated Intel devices, the only ones a case looks for.
pub const SOFTWARE_DEVICES: ProductLine = ProductLine::SW_ONLY.union(ProductLine::ANY_INTEL);

// Long enough that silence during a scenario never reads as a departure.
const DEPARTURE_LEASE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct DeviceCase {
    pub name: String,
    pub model: DeviceModel,
    pub info: DeviceInfo,
    pub fixture: DeviceFixture,
    pub expected_devices: usize,
}

impl DeviceCase {
    pub fn for_model(model: DeviceModel) -> Self {
        let info = model.device_info();
        let fixture = DeviceFixture {
            name: info.name.clone(),
            serial: info.serial.clone(),
            topic_root: info.topic_root.clone(),
            sensors: expected_sensors(model),
        };
        Self {
            name: model.name().to_string(),
            model,
            info,
            fixture,
            expected_devices: 1,
        }
    }

    pub fn broadcast_command(&self) -> RemoteCommand {
        RemoteCommand::Broadcast {
            bind: BIND_NAME.to_string(),
            model: self.model.name().to_string(),
            info: self.info.clone(),
        }
    }
}

fn expected_sensors(model: DeviceModel) -> Vec<(String, usize)> {
    let counts: &[(&str, usize)] = match model {
        DeviceModel::D435i => &[(STEREO_MODULE, 104), (RGB_CAMERA, 64), (MOTION_MODULE, 2)],
        DeviceModel::D405 => &[(STEREO_MODULE, 146)],
        DeviceModel::D455 => &[(STEREO_MODULE, 100), (RGB_CAMERA, 62), (MOTION_MODULE, 2)],
    };
    counts
        .iter()
        .map(|(name, count)| (name.to_string(), *count))
        .collect()
}

pub fn standard_cases() -> Vec<DeviceCase> {
    DeviceModel::ALL.into_iter().map(DeviceCase::for_model).collect()
}

/// Checks the discovered device against the case fixture.
pub fn check_device(
    scenario: &mut Scenario,
    device: &DiscoveredDevice,
    case: &DeviceCase,
) -> Result<(), ScenarioError> {
    scenario.record_all(verify(device, &case.fixture));
    Ok(())
}

/// Runs one case as its own scenario with the standard device checks.
pub async fn run_case(
    runner: &mut ScenarioRunner,
    remote: &mut RemoteSession,
    discovery: &DiscoveryContext,
    case: &DeviceCase,
    deadline: Duration,
) -> ScenarioStatus {
    run_case_with(runner, remote, discovery, case, deadline, check_device).await
}

/// Runs one case as its own scenario, applying `check` to the first device
/// discovered. Errors and panics in the body, `check` included, become faults
/// of that scenario; the device handle is released and the broadcast closed
/// whether the body passed or not.
pub async fn run_case_with<F>(
    runner: &mut ScenarioRunner,
    remote: &mut RemoteSession,
    discovery: &DiscoveryContext,
    case: &DeviceCase,
    deadline: Duration,
    check: F,
) -> ScenarioStatus
where
    F: FnOnce(&mut Scenario, &DiscoveredDevice, &DeviceCase) -> Result<(), ScenarioError>,
{
    let mut scenario = runner.start(&case.name);
    let mut device: Option<DiscoveredDevice> = None;
    let mut bound = false;
    let mut changes = discovery.watch_changes(SOFTWARE_DEVICES, DEPARTURE_LEASE);

    let outcome = guarded(case_body(
        &mut scenario,
        remote,
        discovery,
        case,
        deadline,
        &mut device,
        &mut bound,
        check,
    ))
    .await;
    if let Err(fault) = outcome {
        scenario.fault(fault);
    }

    drop(device.take());
    if bound {
        let close = RemoteCommand::Close {
            name: BIND_NAME.to_string(),
        };
        match remote.run(close).await {
            Ok(_) => {
                if !departed(&mut changes, &case.info.topic_root, deadline).await {
                    warn!(
                        target: "harness::scenario",
                        topic_root = %case.info.topic_root,
                        "departure of closed broadcast not observed"
                    );
                }
            }
            Err(err) => scenario.fault(format!("teardown: {err}")),
        }
    }
    runner.finish(scenario)
}

/// Waits for the offline announcement of `topic_root`. Announcements from one
/// broadcaster arrive in order, so once it is seen no stale heartbeat of
/// that device can reach a later watch.
async fn departed(changes: &mut ChangeWatch, topic_root: &str, deadline: Duration) -> bool {
    let observed = async {
        while let Some(change) = changes.next().await {
            if let DeviceChange::Removed { topic_root: gone } = change {
                if gone == topic_root {
                    return true;
                }
            }
        }
        false
    };
    timeout(deadline, observed).await.unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
async fn case_body<F>(
    scenario: &mut Scenario,
    remote: &mut RemoteSession,
    discovery: &DiscoveryContext,
    case: &DeviceCase,
    deadline: Duration,
    device: &mut Option<DiscoveredDevice>,
    bound: &mut bool,
    check: F,
) -> Result<(), ScenarioError>
where
    F: FnOnce(&mut Scenario, &DiscoveredDevice, &DeviceCase) -> Result<(), ScenarioError>,
{
    // Subscribe first so the initial announcement cannot slip past.
    let mut watch = discovery.wait_for_devices(SOFTWARE_DEVICES, deadline);
    remote.run(case.broadcast_command()).await?;
    *bound = true;

    let mut found = 0usize;
    while let Some(candidate) = watch.next().await {
        debug!(target: "harness::scenario", device = ?candidate, "device observed");
        found += 1;
        if device.is_none() {
            *device = Some(candidate);
        }
    }
    scenario.check_equal("devices discovered", case.expected_devices, found);

    match device.as_ref() {
        Some(discovered) => check(scenario, discovered, case),
        None => Ok(()),
    }
}
