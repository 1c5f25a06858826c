use device_discovery::{CameraInfo, DiscoveredDevice};
use serde::{Deserialize, Serialize};

use crate::scenario::CheckResult;

/// Expected identity and catalog shape of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFixture {
    pub name: String,
    pub serial: String,
    pub topic_root: String,
    /// Sensor name and expected stream-profile count, in announcement order.
    pub sensors: Vec<(String, usize)>,
}

/// Compares `device` against `fixture`. Every comparison yields a check; a
/// missing sensor fails its presence check and the remaining sensors are
/// still compared.
pub fn verify(device: &DiscoveredDevice, fixture: &DeviceFixture) -> Vec<CheckResult> {
    let mut checks = vec![
        CheckResult::equal("name", fixture.name.clone(), device.get_info(CameraInfo::Name)),
        CheckResult::equal(
            "serial number",
            fixture.serial.clone(),
            device.get_info(CameraInfo::SerialNumber),
        ),
        CheckResult::equal(
            "physical port",
            fixture.topic_root.clone(),
            device.get_info(CameraInfo::PhysicalPort),
        ),
    ];

    let sensors = device.query_sensors();
    checks.push(CheckResult::equal(
        "sensor count",
        fixture.sensors.len(),
        sensors.len(),
    ));

    for (name, expected) in &fixture.sensors {
        match sensors.iter().find(|sensor| sensor.name() == name) {
            Some(sensor) => checks.push(CheckResult::equal(
                format!("'{name}' stream profiles"),
                *expected,
                sensor.stream_profiles().len(),
            )),
            None => checks.push(CheckResult {
                expected: Some(format!("{name:?}")),
                actual: Some("missing".to_string()),
                ..CheckResult::fail(format!("'{name}' sensor present"))
            }),
        }
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_fixtures::DeviceModel;
    use harness_proto::ProductLine;

    fn discovered(model: DeviceModel) -> DiscoveredDevice {
        let mut info = model.device_info();
        info.product_line |= ProductLine::SW_ONLY;
        DiscoveredDevice::from(model.descriptor(info))
    }

    fn d455_fixture() -> DeviceFixture {
        DeviceFixture {
            name: "D455".into(),
            serial: "0455".into(),
            topic_root: "realsense/D455_0455".into(),
            sensors: vec![
                ("Stereo Module".into(), 100),
                ("RGB Camera".into(), 62),
                ("Motion Module".into(), 2),
            ],
        }
    }

    #[test]
    fn matching_device_passes_every_check() {
        let checks = verify(&discovered(DeviceModel::D455), &d455_fixture());
        assert_eq!(checks.len(), 7);
        assert!(checks.iter().all(|check| check.passed), "{checks:#?}");
    }

    #[test]
    fn identity_mismatch_is_reported_with_values() {
        let mut fixture = d455_fixture();
        fixture.serial = "9999".into();
        let checks = verify(&discovered(DeviceModel::D455), &fixture);
        let failed: Vec<String> = checks
            .iter()
            .filter(|check| !check.passed)
            .map(ToString::to_string)
            .collect();
        assert_eq!(failed, [r#"serial number: expected "9999", got "0455""#]);
    }

    #[test]
    fn missing_sensor_fails_but_verification_continues() {
        let mut fixture = d455_fixture();
        fixture.sensors.insert(1, ("Fisheye".into(), 4));
        let checks = verify(&discovered(DeviceModel::D455), &fixture);

        let failed: Vec<&str> = checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.description.as_str())
            .collect();
        assert_eq!(failed, ["sensor count", "'Fisheye' sensor present"]);
        // The sensors after the missing one were still compared.
        assert!(checks
            .iter()
            .any(|check| check.description == "'Motion Module' stream profiles" && check.passed));
    }

    #[test]
    fn profile_count_mismatch_is_a_failed_check() {
        let fixture = DeviceFixture {
            name: "D405".into(),
            serial: "0405".into(),
            topic_root: "realsense/D405_0405".into(),
            sensors: vec![("Stereo Module".into(), 145)],
        };
        let checks = verify(&discovered(DeviceModel::D405), &fixture);
        let failed: Vec<&CheckResult> = checks.iter().filter(|check| !check.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].actual.as_deref(), Some("146"));
    }
}
