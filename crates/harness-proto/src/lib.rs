//! Shared protocol definitions for harness ↔ broadcaster communication.
//! Two surfaces live here: the control channel spoken over the broadcaster's
//! stdio, and the device announcements published on the discovery bus.
//! Keeping them in a dedicated crate lets both processes agree on the wire
//! shape without pulling in runtime code.

pub mod control;
pub mod device;

pub use control::{
    ControlFrame, ControlRequest, ReadySignal, RemoteCommand, RemoteFrame, Reply, ReplyStatus,
};
pub use device::{
    DeviceAnnouncement, DeviceDescriptor, DeviceInfo, Format, ProductLine, SensorDescriptor,
    StreamKind, StreamProfile, DEVICE_INFO_TOPIC,
};

use serde::Serialize;

/// Serializes a frame as a single JSON line, newline included.
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}
