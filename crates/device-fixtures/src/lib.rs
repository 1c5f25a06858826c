//! Catalogs of the camera models the broadcaster can simulate.
//!
//! Each model carries a default identity and the full sensor tree it
//! announces. Profile tables are expanded from resolution × frame-rate grids.

mod profiles;

use std::fmt;
use std::str::FromStr;

use harness_proto::{
    DeviceDescriptor, DeviceInfo, Format, ProductLine, SensorDescriptor, StreamKind,
};
use profiles::{expand, mode, motion, set, Mode};
use thiserror::Error;

pub const STEREO_MODULE: &str = "Stereo Module";
pub const RGB_CAMERA: &str = "RGB Camera";
pub const MOTION_MODULE: &str = "Motion Module";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    D435i,
    D405,
    D455,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown device model '{0}'")]
pub struct UnknownModel(pub String);

impl DeviceModel {
    pub const ALL: [DeviceModel; 3] = [DeviceModel::D435i, DeviceModel::D405, DeviceModel::D455];

    pub fn name(self) -> &'static str {
        match self {
            DeviceModel::D435i => "D435I",
            DeviceModel::D405 => "D405",
            DeviceModel::D455 => "D455",
        }
    }

    /// Identity the model is broadcast with unless the caller overrides it.
    pub fn device_info(self) -> DeviceInfo {
        let (name, serial) = match self {
            DeviceModel::D435i => ("D435I", "0123"),
            DeviceModel::D405 => ("D405", "0405"),
            DeviceModel::D455 => ("D455", "0455"),
        };
        DeviceInfo {
            name: name.to_string(),
            serial: serial.to_string(),
            product_line: ProductLine::D400,
            topic_root: format!("realsense/{name}_{serial}"),
        }
    }

    pub fn sensors(self) -> Vec<SensorDescriptor> {
        match self {
            DeviceModel::D435i => vec![
                sensor(STEREO_MODULE, expand(&D435I_STEREO)),
                sensor(RGB_CAMERA, expand(&D435I_COLOR)),
                sensor(MOTION_MODULE, motion(StreamKind::Gyro, &[200, 400])),
            ],
            DeviceModel::D405 => vec![sensor(STEREO_MODULE, expand(&D405_STEREO))],
            DeviceModel::D455 => vec![
                sensor(STEREO_MODULE, expand(&D455_STEREO)),
                sensor(RGB_CAMERA, expand(&D455_COLOR)),
                sensor(MOTION_MODULE, motion(StreamKind::Gyro, &[200, 400])),
            ],
        }
    }

    /// Full announcement content for this model under the given identity.
    pub fn descriptor(self, info: DeviceInfo) -> DeviceDescriptor {
        DeviceDescriptor {
            info,
            sensors: self.sensors(),
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceModel {
    type Err = UnknownModel;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        DeviceModel::ALL
            .into_iter()
            .find(|model| model.name().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| UnknownModel(raw.to_string()))
    }
}

fn sensor(name: &str, profiles: Vec<harness_proto::StreamProfile>) -> SensorDescriptor {
    SensorDescriptor {
        name: name.to_string(),
        profiles,
    }
}

const D435I_STEREO_MODES: &[Mode] = &[
    mode(1280, 720, &[6, 15, 30]),
    mode(848, 480, &[6, 15, 30, 60, 90]),
    mode(640, 480, &[6, 15, 30, 60, 90]),
    mode(640, 360, &[6, 15, 30, 60, 90]),
    mode(480, 270, &[6, 15, 30, 60, 90]),
    mode(424, 240, &[6, 15, 30]),
];

const D435I_STEREO: [profiles::ProfileSet; 4] = [
    set(StreamKind::Depth, 0, Format::Z16, D435I_STEREO_MODES),
    set(StreamKind::Infrared, 1, Format::Y8, D435I_STEREO_MODES),
    set(StreamKind::Infrared, 2, Format::Y8, D435I_STEREO_MODES),
    set(StreamKind::Infrared, 1, Format::Y16, D435I_STEREO_MODES),
];

const D435I_COLOR_MODES: &[Mode] = &[
    mode(1920, 1080, &[6, 15, 30]),
    mode(1280, 720, &[6, 15, 30]),
    mode(960, 540, &[6, 15, 30, 60]),
    mode(848, 480, &[6, 15, 30, 60]),
    mode(640, 480, &[30, 60]),
];

const D435I_COLOR: [profiles::ProfileSet; 4] = [
    set(StreamKind::Color, 0, Format::Rgb8, D435I_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Bgr8, D435I_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Rgba8, D435I_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Yuyv, D435I_COLOR_MODES),
];

const D405_MODES: &[Mode] = &[
    mode(1280, 720, &[5, 15, 30]),
    mode(848, 480, &[5, 15, 30, 60, 90]),
    mode(640, 480, &[5, 15, 30, 60, 90]),
    mode(640, 360, &[5, 15, 30, 60, 90]),
    mode(480, 270, &[5, 15, 30, 60, 90]),
    mode(424, 240, &[5, 15, 30, 60, 90]),
];

const D405_BGR_MODES: &[Mode] = &[mode(1280, 720, &[5, 15, 30]), mode(848, 480, &[5, 15, 30])];

// The D405 has no separate RGB sensor; color comes off the stereo module.
const D405_STEREO: [profiles::ProfileSet; 6] = [
    set(StreamKind::Depth, 0, Format::Z16, D405_MODES),
    set(StreamKind::Infrared, 1, Format::Y8, D405_MODES),
    set(StreamKind::Infrared, 2, Format::Y8, D405_MODES),
    set(StreamKind::Color, 0, Format::Rgb8, D405_MODES),
    set(StreamKind::Color, 0, Format::Yuyv, D405_MODES),
    set(StreamKind::Color, 0, Format::Bgr8, D405_BGR_MODES),
];

const D455_STEREO_MODES: &[Mode] = &[
    mode(1280, 720, &[5, 15, 30]),
    mode(848, 480, &[5, 15, 30, 60, 90]),
    mode(640, 480, &[5, 15, 30, 60, 90]),
    mode(640, 360, &[5, 15, 30, 60, 90]),
    mode(480, 270, &[5, 15, 30, 60, 90]),
    mode(424, 240, &[5, 15]),
];

const D455_STEREO: [profiles::ProfileSet; 4] = [
    set(StreamKind::Depth, 0, Format::Z16, D455_STEREO_MODES),
    set(StreamKind::Infrared, 1, Format::Y8, D455_STEREO_MODES),
    set(StreamKind::Infrared, 2, Format::Y8, D455_STEREO_MODES),
    set(StreamKind::Infrared, 1, Format::Y16, D455_STEREO_MODES),
];

const D455_COLOR_MODES: &[Mode] = &[
    mode(1280, 800, &[5, 15, 30]),
    mode(1280, 720, &[5, 15, 30]),
    mode(848, 480, &[5, 15, 30, 60]),
    mode(640, 480, &[5, 15, 30, 60]),
    mode(640, 360, &[30]),
];

const D455_BGRA_MODES: &[Mode] = &[mode(1280, 800, &[5, 15])];

const D455_COLOR: [profiles::ProfileSet; 5] = [
    set(StreamKind::Color, 0, Format::Rgb8, D455_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Bgr8, D455_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Rgba8, D455_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Yuyv, D455_COLOR_MODES),
    set(StreamKind::Color, 0, Format::Bgra8, D455_BGRA_MODES),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(model: DeviceModel) -> Vec<(String, usize)> {
        model
            .sensors()
            .into_iter()
            .map(|sensor| (sensor.name, sensor.profiles.len()))
            .collect()
    }

    #[test]
    fn d435i_catalog() {
        assert_eq!(
            counts(DeviceModel::D435i),
            vec![
                (STEREO_MODULE.to_string(), 104),
                (RGB_CAMERA.to_string(), 64),
                (MOTION_MODULE.to_string(), 2),
            ]
        );
    }

    #[test]
    fn d405_catalog() {
        assert_eq!(counts(DeviceModel::D405), vec![(STEREO_MODULE.to_string(), 146)]);
    }

    #[test]
    fn d455_catalog() {
        assert_eq!(
            counts(DeviceModel::D455),
            vec![
                (STEREO_MODULE.to_string(), 100),
                (RGB_CAMERA.to_string(), 62),
                (MOTION_MODULE.to_string(), 2),
            ]
        );
    }

    #[test]
    fn identities_are_distinct() {
        let roots: std::collections::HashSet<String> = DeviceModel::ALL
            .into_iter()
            .map(|model| model.device_info().topic_root)
            .collect();
        assert_eq!(roots.len(), DeviceModel::ALL.len());
        assert_eq!(DeviceModel::D435i.device_info().topic_root, "realsense/D435I_0123");
    }

    #[test]
    fn parses_model_names() {
        assert_eq!("d435i".parse::<DeviceModel>(), Ok(DeviceModel::D435i));
        assert_eq!(" D455 ".parse::<DeviceModel>(), Ok(DeviceModel::D455));
        assert_eq!(
            "L515".parse::<DeviceModel>(),
            Err(UnknownModel("L515".to_string()))
        );
    }

    #[test]
    fn descriptor_keeps_given_identity() {
        let mut info = DeviceModel::D405.device_info();
        info.serial = "9999".into();
        let descriptor = DeviceModel::D405.descriptor(info.clone());
        assert_eq!(descriptor.info, info);
        assert_eq!(descriptor.sensors.len(), 1);
    }
}
