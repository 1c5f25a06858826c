use std::time::Duration;

use harness_proto::ProductLine;
use thiserror::Error;
use transport_bus::BusError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to open discovery context on domain {domain}: {source}")]
    ContextOpen {
        domain: u32,
        #[source]
        source: BusError,
    },
    #[error("discovery context is closed")]
    Closed,
    #[error("no device matching {filter} appeared within {}ms", .timeout.as_millis())]
    Timeout {
        filter: ProductLine,
        timeout: Duration,
    },
    #[error("failed to publish announcement: {0}")]
    Publish(#[source] BusError),
    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid discovery settings: {0}")]
    Settings(String),
}
