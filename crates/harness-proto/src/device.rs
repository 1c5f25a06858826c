use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bus topic carrying [`DeviceAnnouncement`] payloads.
pub const DEVICE_INFO_TOPIC: &str = "device-info";

/// Device-class bitmask. A device advertises the classes it belongs to and a
/// watcher passes the classes it is interested in; the two match when they
/// share at least one bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductLine(u32);

impl ProductLine {
    pub const NONE: ProductLine = ProductLine(0);
    pub const NON_INTEL: ProductLine = ProductLine(0x01);
    pub const D400: ProductLine = ProductLine(0x02);
    pub const SR300: ProductLine = ProductLine(0x04);
    pub const L500: ProductLine = ProductLine(0x08);
    pub const T200: ProductLine = ProductLine(0x10);
    pub const D500: ProductLine = ProductLine(0x20);
    pub const ANY_INTEL: ProductLine = ProductLine(0xfe);
    pub const ANY: ProductLine = ProductLine(0xff);
    /// Set on devices that are simulated in software rather than attached.
    pub const SW_ONLY: ProductLine = ProductLine(0x100);

    const NAMES: &'static [(ProductLine, &'static str)] = &[
        (ProductLine::NON_INTEL, "non-intel"),
        (ProductLine::D400, "d400"),
        (ProductLine::SR300, "sr300"),
        (ProductLine::L500, "l500"),
        (ProductLine::T200, "t200"),
        (ProductLine::D500, "d500"),
        (ProductLine::SW_ONLY, "sw-only"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        ProductLine(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ProductLine) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: ProductLine) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: ProductLine) -> Self {
        ProductLine(self.0 | other.0)
    }

    /// Whether a device advertising `device` passes this mask.
    ///
    /// `SW_ONLY` in a mask is a restriction, not a category: the device must
    /// itself be software-only, and must still share a category with the rest
    /// of the mask when the mask names any.
    pub const fn admits(self, device: ProductLine) -> bool {
        let categories = ProductLine(self.0 & !Self::SW_ONLY.0);
        if self.contains(Self::SW_ONLY) {
            device.contains(Self::SW_ONLY)
                && (categories.is_empty() || categories.intersects(device))
        } else {
            categories.intersects(device)
        }
    }

    /// Parses a single category name (`sw-only`, `any-intel`, `d400`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "any" => Some(ProductLine::ANY),
            "any-intel" | "any-vendor" => Some(ProductLine::ANY_INTEL),
            "none" => Some(ProductLine::NONE),
            other => Self::NAMES
                .iter()
                .find(|(_, label)| *label == other)
                .map(|(line, _)| *line),
        }
    }
}

impl BitOr for ProductLine {
    type Output = ProductLine;

    fn bitor(self, rhs: Self) -> Self::Output {
        ProductLine(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProductLine {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ProductLine {
    type Output = ProductLine;

    fn bitand(self, rhs: Self) -> Self::Output {
        ProductLine(self.0 & rhs.0)
    }
}

impl fmt::Debug for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProductLine({self})")
    }
}

impl fmt::Display for ProductLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        let mut known = 0u32;
        for (line, label) in Self::NAMES {
            if self.contains(*line) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(label)?;
                first = false;
                known |= line.0;
            }
        }
        let rest = self.0 & !known;
        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}

/// Identity fields a device reports through camera-info queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub product_line: ProductLine,
    pub topic_root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Depth,
    Infrared,
    Color,
    Gyro,
    Accel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Z16,
    Y8,
    Y16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Yuyv,
    Uyvy,
    MotionXyz32f,
}

/// One capability of a sensor: a stream at a given format, resolution and
/// frame rate. Motion streams carry a zero resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub stream: StreamKind,
    pub index: u8,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    pub profiles: Vec<StreamProfile>,
}

/// Everything a simulated device publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub info: DeviceInfo,
    pub sensors: Vec<SensorDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceAnnouncement {
    Online(DeviceDescriptor),
    Offline { topic_root: String },
}

impl DeviceAnnouncement {
    pub fn topic_root(&self) -> &str {
        match self {
            DeviceAnnouncement::Online(descriptor) => &descriptor.info.topic_root,
            DeviceAnnouncement::Offline { topic_root } => topic_root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sw_only_mask_restricts_to_software_devices() {
        let only_sw = ProductLine::SW_ONLY.union(ProductLine::ANY_INTEL);
        assert!(only_sw.admits(ProductLine::D400 | ProductLine::SW_ONLY));
        assert!(!only_sw.admits(ProductLine::D400));
        assert!(!only_sw.admits(ProductLine::NON_INTEL | ProductLine::SW_ONLY));
        assert!(ProductLine::SW_ONLY.admits(ProductLine::NON_INTEL | ProductLine::SW_ONLY));
        assert!(!ProductLine::SW_ONLY.admits(ProductLine::D500));
    }

    #[test]
    fn category_mask_admits_hardware_and_software_alike() {
        assert!(ProductLine::ANY_INTEL.admits(ProductLine::D400));
        assert!(ProductLine::ANY_INTEL.admits(ProductLine::D400 | ProductLine::SW_ONLY));
        assert!(!ProductLine::D500.admits(ProductLine::D400));
        assert!(!ProductLine::NONE.admits(ProductLine::D400 | ProductLine::SW_ONLY));
    }

    #[test]
    fn parses_category_names() {
        assert_eq!(ProductLine::from_name("sw_only"), Some(ProductLine::SW_ONLY));
        assert_eq!(
            ProductLine::from_name("Any-Vendor"),
            Some(ProductLine::ANY_INTEL)
        );
        assert_eq!(ProductLine::from_name("D400"), Some(ProductLine::D400));
        assert_eq!(ProductLine::from_name("x100"), None);
    }

    #[test]
    fn displays_known_and_unknown_bits() {
        let line = ProductLine::D400 | ProductLine::SW_ONLY | ProductLine::from_bits(0x4000);
        assert_eq!(line.to_string(), "d400|sw-only|0x4000");
        assert_eq!(ProductLine::NONE.to_string(), "none");
    }

    #[test]
    fn announcement_is_tagged_by_kind() {
        let offline = DeviceAnnouncement::Offline {
            topic_root: "realsense/D405_0405".into(),
        };
        let value = serde_json::to_value(&offline).expect("serialize");
        assert_eq!(value["kind"], "offline");
        assert_eq!(offline.topic_root(), "realsense/D405_0405");

        let online: DeviceAnnouncement = serde_json::from_str(
            r#"{"kind":"online","info":{"name":"D405","serial":"0405","product_line":258,"topic_root":"realsense/D405_0405"},"sensors":[]}"#,
        )
        .expect("parse online");
        match online {
            DeviceAnnouncement::Online(descriptor) => {
                assert_eq!(descriptor.info.product_line, ProductLine::D400 | ProductLine::SW_ONLY);
                assert!(descriptor.sensors.is_empty());
            }
            other => panic!("unexpected announcement {other:?}"),
        }
    }
}
