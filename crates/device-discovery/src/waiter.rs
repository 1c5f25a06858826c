use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, Stream};
use harness_proto::{DeviceAnnouncement, ProductLine};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};
use transport_bus::BusMessage;

use crate::device::DiscoveredDevice;

/// Why a [`DeviceWatch`] stopped producing devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// No new device appeared within the idle deadline.
    Deadline,
    /// The discovery context was closed underneath the watch.
    FeedClosed,
}

/// Lazy, time-bounded sequence of newly observed devices.
///
/// Each call to [`DeviceWatch::next`] resolves as soon as an announcement for
/// a device this watch has not yielded yet arrives, or returns `None` once
/// `idle` has elapsed since the previous device (or since the watch began).
/// Dropping the watch releases its subscription; it does not need to be
/// drained.
pub struct DeviceWatch {
    rx: broadcast::Receiver<BusMessage>,
    filter: ProductLine,
    idle: Duration,
    until: Instant,
    seen: HashSet<String>,
    yielded: usize,
    ended: Option<WatchEnd>,
}

impl DeviceWatch {
    pub(crate) fn new(
        rx: broadcast::Receiver<BusMessage>,
        filter: ProductLine,
        idle: Duration,
    ) -> Self {
        Self {
            rx,
            filter,
            idle,
            until: Instant::now() + idle,
            seen: HashSet::new(),
            yielded: 0,
            ended: None,
        }
    }

    pub fn filter(&self) -> ProductLine {
        self.filter
    }

    /// Number of devices handed out so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    pub fn end_reason(&self) -> Option<WatchEnd> {
        self.ended
    }

    pub async fn next(&mut self) -> Option<DiscoveredDevice> {
        if self.ended.is_some() {
            return None;
        }
        loop {
            let message = match timeout_at(self.until, self.rx.recv()).await {
                Err(_) => return self.finish(WatchEnd::Deadline),
                Ok(Err(RecvError::Closed)) => return self.finish(WatchEnd::FeedClosed),
                Ok(Err(RecvError::Lagged(skipped))) => {
                    // Devices re-announce periodically, so dropped frames are recovered.
                    debug!(target: "discovery::watch", skipped, "watch lagged behind feed");
                    continue;
                }
                Ok(Ok(message)) => message,
            };
            let Some(announcement) = decode_announcement(&message) else {
                continue;
            };
            match announcement {
                DeviceAnnouncement::Online(descriptor) => {
                    let line = descriptor.info.product_line;
                    if !self.filter.admits(line) {
                        trace!(
                            target: "discovery::watch",
                            topic_root = %descriptor.info.topic_root,
                            product_line = %line,
                            filter = %self.filter,
                            "device filtered out"
                        );
                        continue;
                    }
                    if !self.seen.insert(descriptor.info.topic_root.clone()) {
                        continue;
                    }
                    self.yielded += 1;
                    self.until = Instant::now() + self.idle;
                    debug!(
                        target: "discovery::watch",
                        name = %descriptor.info.name,
                        serial = %descriptor.info.serial,
                        topic_root = %descriptor.info.topic_root,
                        "device discovered"
                    );
                    return Some(DiscoveredDevice::new(descriptor));
                }
                DeviceAnnouncement::Offline { topic_root } => {
                    // A device that leaves and comes back counts as new.
                    if self.seen.remove(&topic_root) {
                        debug!(target: "discovery::watch", %topic_root, "device departed");
                    }
                }
            }
        }
    }

    /// Consumes the watch until it ends and returns everything it yielded.
    pub async fn collect_all(mut self) -> Vec<DiscoveredDevice> {
        let mut devices = Vec::new();
        while let Some(device) = self.next().await {
            devices.push(device);
        }
        devices
    }

    pub fn into_stream(self) -> impl Stream<Item = DiscoveredDevice> {
        stream::unfold(self, |mut watch| async move {
            watch.next().await.map(|device| (device, watch))
        })
    }

    fn finish(&mut self, reason: WatchEnd) -> Option<DiscoveredDevice> {
        trace!(target: "discovery::watch", ?reason, yielded = self.yielded, "watch ended");
        self.ended = Some(reason);
        None
    }
}

pub(crate) fn decode_announcement(message: &BusMessage) -> Option<DeviceAnnouncement> {
    match serde_json::from_slice::<DeviceAnnouncement>(&message.payload) {
        Ok(announcement) => Some(announcement),
        Err(err) => {
            debug!(
                target: "discovery::watch",
                topic = %message.topic,
                error = %err,
                "ignoring undecodable announcement"
            );
            None
        }
    }
}
