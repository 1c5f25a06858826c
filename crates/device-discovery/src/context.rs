use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use harness_proto::{DeviceAnnouncement, ProductLine, DEVICE_INFO_TOPIC};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};
use transport_bus::{Bus, UdpDomainBus};
use uuid::Uuid;

use crate::changes::ChangeWatch;
use crate::config::DiscoveryConfig;
use crate::device::DiscoveredDevice;
use crate::error::DiscoveryError;
use crate::waiter::DeviceWatch;

/// A participant bound to one discovery domain.
///
/// The context is opened once per run and shared by reference; it never
/// changes after opening. Devices the context filter does not admit are
/// invisible to every watch created from it.
pub struct DiscoveryContext {
    config: DiscoveryConfig,
    guid: Uuid,
    filter: ProductLine,
    bus: Arc<dyn Bus>,
    closed: AtomicBool,
}

impl DiscoveryContext {
    /// Binds a localhost UDP participant on `config.domain`.
    pub async fn open(config: DiscoveryConfig, filter: ProductLine) -> Result<Self, DiscoveryError> {
        let bus = UdpDomainBus::bind(config.domain)
            .await
            .map_err(|source| DiscoveryError::ContextOpen {
                domain: config.domain,
                source,
            })?;
        info!(
            target: "discovery::context",
            domain = config.domain,
            participant = %config.participant,
            slot = bus.slot(),
            guid = %bus.guid(),
            %filter,
            "discovery context open"
        );
        let guid = bus.guid();
        let mut context = Self::with_bus(Arc::new(bus), config, filter);
        context.guid = guid;
        Ok(context)
    }

    /// Wraps an existing bus, e.g. an in-process [`transport_bus::LocalBus`].
    pub fn with_bus(bus: Arc<dyn Bus>, config: DiscoveryConfig, filter: ProductLine) -> Self {
        Self {
            config,
            guid: Uuid::new_v4(),
            filter,
            bus,
            closed: AtomicBool::new(false),
        }
    }

    pub fn domain(&self) -> u32 {
        self.config.domain
    }

    pub fn participant(&self) -> &str {
        &self.config.participant
    }

    /// Identity of this participant on the wire. Contexts built over an
    /// in-process bus get a random one.
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn filter(&self) -> ProductLine {
        self.filter
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Starts a watch for devices matching both `mask` and the context
    /// filter. See [`DeviceWatch`] for the termination rule.
    pub fn wait_for_devices(&self, mask: ProductLine, deadline: Duration) -> DeviceWatch {
        let filter = self.filter & mask;
        debug!(
            target: "discovery::context",
            %filter,
            deadline_ms = deadline.as_millis() as u64,
            "waiting for devices"
        );
        DeviceWatch::new(self.bus.subscribe(DEVICE_INFO_TOPIC), filter, deadline)
    }

    /// Waits for the first matching device, failing if none appears in time.
    pub async fn wait_for_device(
        &self,
        mask: ProductLine,
        deadline: Duration,
    ) -> Result<DiscoveredDevice, DiscoveryError> {
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }
        let mut watch = self.wait_for_devices(mask, deadline);
        match watch.next().await {
            Some(device) => Ok(device),
            None => Err(DiscoveryError::Timeout {
                filter: watch.filter(),
                timeout: deadline,
            }),
        }
    }

    /// Distinct devices announced within `window`.
    pub async fn query_devices(&self, mask: ProductLine, window: Duration) -> Vec<DiscoveredDevice> {
        let stop = Instant::now() + window;
        let mut watch = self.wait_for_devices(mask, window);
        let mut devices = Vec::new();
        while let Ok(Some(device)) = timeout_at(stop, watch.next()).await {
            devices.push(device);
        }
        devices
    }

    /// Follows devices appearing and disappearing. A device that stays
    /// silent for `lease` is reported removed.
    pub fn watch_changes(&self, mask: ProductLine, lease: Duration) -> ChangeWatch {
        ChangeWatch::new(self.bus.subscribe(DEVICE_INFO_TOPIC), self.filter & mask, lease)
    }

    /// Publishes an announcement from this participant.
    pub fn announce(&self, announcement: &DeviceAnnouncement) -> Result<(), DiscoveryError> {
        if self.is_closed() {
            return Err(DiscoveryError::Closed);
        }
        let payload = serde_json::to_vec(announcement)?;
        self.bus
            .publish(DEVICE_INFO_TOPIC, Bytes::from(payload))
            .map_err(DiscoveryError::Publish)
    }

    /// Releases the participant binding. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.close();
        info!(
            target: "discovery::context",
            domain = self.config.domain,
            participant = %self.config.participant,
            "discovery context closed"
        );
    }
}
