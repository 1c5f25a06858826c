use std::fmt;
use std::sync::Arc;

use harness_proto::{DeviceDescriptor, ProductLine, StreamProfile};

/// Identity fields that can be queried on a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraInfo {
    Name,
    SerialNumber,
    /// Alias of the topic root for network devices.
    PhysicalPort,
    TopicRoot,
    ProductLine,
}

/// Read-through handle onto an announced device. Cloning is cheap; all
/// clones view the same announcement snapshot.
#[derive(Clone)]
pub struct DiscoveredDevice {
    descriptor: Arc<DeviceDescriptor>,
}

impl DiscoveredDevice {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
        }
    }

    pub fn get_info(&self, info: CameraInfo) -> String {
        let identity = &self.descriptor.info;
        match info {
            CameraInfo::Name => identity.name.clone(),
            CameraInfo::SerialNumber => identity.serial.clone(),
            CameraInfo::PhysicalPort | CameraInfo::TopicRoot => identity.topic_root.clone(),
            CameraInfo::ProductLine => identity.product_line.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.info.name
    }

    pub fn serial_number(&self) -> &str {
        &self.descriptor.info.serial
    }

    pub fn topic_root(&self) -> &str {
        &self.descriptor.info.topic_root
    }

    pub fn product_line(&self) -> ProductLine {
        self.descriptor.info.product_line
    }

    pub fn query_sensors(&self) -> Vec<SensorHandle> {
        (0..self.descriptor.sensors.len())
            .map(|index| SensorHandle {
                descriptor: Arc::clone(&self.descriptor),
                index,
            })
            .collect()
    }
}

impl From<DeviceDescriptor> for DiscoveredDevice {
    fn from(descriptor: DeviceDescriptor) -> Self {
        Self::new(descriptor)
    }
}

impl fmt::Debug for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("name", &self.name())
            .field("serial", &self.serial_number())
            .field("topic_root", &self.topic_root())
            .field("sensors", &self.descriptor.sensors.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct SensorHandle {
    descriptor: Arc<DeviceDescriptor>,
    index: usize,
}

impl SensorHandle {
    pub fn name(&self) -> &str {
        &self.descriptor.sensors[self.index].name
    }

    pub fn stream_profiles(&self) -> &[StreamProfile] {
        &self.descriptor.sensors[self.index].profiles
    }
}

impl fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorHandle")
            .field("name", &self.name())
            .field("profiles", &self.stream_profiles().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_fixtures::DeviceModel;

    #[test]
    fn exposes_identity_and_sensor_tree() {
        let model = DeviceModel::D435i;
        let mut info = model.device_info();
        info.product_line |= ProductLine::SW_ONLY;
        let device = DiscoveredDevice::new(model.descriptor(info));

        assert_eq!(device.get_info(CameraInfo::Name), "D435I");
        assert_eq!(device.get_info(CameraInfo::SerialNumber), "0123");
        assert_eq!(
            device.get_info(CameraInfo::PhysicalPort),
            device.get_info(CameraInfo::TopicRoot)
        );
        assert_eq!(device.get_info(CameraInfo::ProductLine), "d400|sw-only");

        let sensors = device.query_sensors();
        let names: Vec<&str> = sensors.iter().map(SensorHandle::name).collect();
        assert_eq!(names, ["Stereo Module", "RGB Camera", "Motion Module"]);
        assert_eq!(sensors[2].stream_profiles().len(), 2);
    }
}
