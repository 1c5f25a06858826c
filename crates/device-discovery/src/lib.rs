//! Device discovery on a domain-partitioned pub/sub bus.
//!
//! A [`DiscoveryContext`] is a participant bound to one domain. Callers ask it
//! for a [`DeviceWatch`], a lazy sequence of [`DiscoveredDevice`] handles that
//! ends once no new device has shown up for a caller-chosen idle deadline.

mod changes;
mod config;
mod context;
mod device;
mod error;
mod waiter;

pub use changes::{ChangeWatch, DeviceChange};
pub use config::DiscoveryConfig;
pub use context::DiscoveryContext;
pub use device::{CameraInfo, DiscoveredDevice, SensorHandle};
pub use error::DiscoveryError;
pub use harness_proto::ProductLine;
pub use waiter::{DeviceWatch, WatchEnd};

use std::time::Duration;

/// Idle deadline used when the caller has no opinion.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
