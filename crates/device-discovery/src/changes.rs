use std::collections::HashMap;
use std::time::Duration;

use harness_proto::{DeviceAnnouncement, ProductLine};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::debug;
use transport_bus::BusMessage;

use crate::device::DiscoveredDevice;
use crate::waiter::decode_announcement;

#[derive(Debug, Clone)]
pub enum DeviceChange {
    Added(DiscoveredDevice),
    Removed { topic_root: String },
}

/// Open-ended feed of devices joining and leaving the domain.
///
/// Unlike [`crate::DeviceWatch`] this has no idle deadline; it ends only when
/// the context closes. Removal is reported either on an explicit offline
/// announcement or once a device has been silent for the lease period.
pub struct ChangeWatch {
    rx: broadcast::Receiver<BusMessage>,
    filter: ProductLine,
    lease: Duration,
    online: HashMap<String, Instant>,
}

impl ChangeWatch {
    pub(crate) fn new(rx: broadcast::Receiver<BusMessage>, filter: ProductLine, lease: Duration) -> Self {
        Self {
            rx,
            filter,
            lease,
            online: HashMap::new(),
        }
    }

    /// Topic roots currently considered online.
    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.online.keys().map(String::as_str)
    }

    pub async fn next(&mut self) -> Option<DeviceChange> {
        loop {
            if let Some(topic_root) = self.take_expired(Instant::now()) {
                debug!(target: "discovery::changes", %topic_root, "device lease expired");
                return Some(DeviceChange::Removed { topic_root });
            }

            let received = match self.next_expiry() {
                Some(expiry) => match timeout_at(expiry, self.rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => continue,
                },
                None => self.rx.recv().await,
            };
            let message = match received {
                Ok(message) => message,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            };
            let Some(announcement) = decode_announcement(&message) else {
                continue;
            };
            match announcement {
                DeviceAnnouncement::Online(descriptor) => {
                    if !self.filter.admits(descriptor.info.product_line) {
                        continue;
                    }
                    let topic_root = descriptor.info.topic_root.clone();
                    let fresh = self.online.insert(topic_root, Instant::now()).is_none();
                    if fresh {
                        return Some(DeviceChange::Added(DiscoveredDevice::new(descriptor)));
                    }
                }
                DeviceAnnouncement::Offline { topic_root } => {
                    if self.online.remove(&topic_root).is_some() {
                        return Some(DeviceChange::Removed { topic_root });
                    }
                }
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.online.values().min().map(|last_seen| *last_seen + self.lease)
    }

    fn take_expired(&mut self, now: Instant) -> Option<String> {
        let expired = self
            .online
            .iter()
            .find(|(_, last_seen)| **last_seen + self.lease <= now)
            .map(|(topic_root, _)| topic_root.clone())?;
        self.online.remove(&expired);
        Some(expired)
    }
}
