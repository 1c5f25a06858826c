use clap::{Args, Parser};
use device_discovery::DEFAULT_DISCOVERY_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

use crate::broadcaster::DEFAULT_ANNOUNCE_INTERVAL;
use crate::remote::DEFAULT_READY_TIMEOUT;
use crate::telemetry::logging::{LogConfig, LogLevel};

pub const DEFAULT_DOMAIN: u32 = 123;
pub const DEFAULT_PARTICIPANT: &str = "device-properties-client";
pub const DEFAULT_NESTED_TAG: &str = "  S";
pub const BROADCASTER_BINARY: &str = "device-broadcaster";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "discovery-harness",
    about = "Drive a device broadcaster in a separate process and verify what discovery sees",
    version
)]
pub struct HarnessCli {
    #[arg(
        long,
        value_name = "PATH",
        env = "HARNESS_BROADCASTER",
        help = "Broadcaster executable (defaults to device-broadcaster next to this binary)"
    )]
    pub broadcaster: Option<PathBuf>,

    #[arg(
        long,
        env = "HARNESS_DOMAIN",
        default_value_t = DEFAULT_DOMAIN,
        value_parser = clap::value_parser!(u32).range(0..=232),
        help = "Discovery domain shared by the harness and the broadcaster"
    )]
    pub domain: u32,

    #[arg(
        long,
        env = "HARNESS_PARTICIPANT",
        default_value = DEFAULT_PARTICIPANT,
        help = "Participant name of the harness-side discovery context"
    )]
    pub participant: String,

    #[arg(
        long = "ready-timeout-ms",
        env = "HARNESS_READY_TIMEOUT_MS",
        default_value_t = DEFAULT_READY_TIMEOUT.as_millis() as u64,
        help = "How long to wait for the broadcaster to signal readiness"
    )]
    pub ready_timeout_ms: u64,

    #[arg(
        long = "discovery-timeout-ms",
        env = "HARNESS_DISCOVERY_TIMEOUT_MS",
        default_value_t = DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
        help = "Idle deadline of each device watch"
    )]
    pub discovery_timeout_ms: u64,

    #[arg(
        long = "nested-tag",
        env = "HARNESS_NESTED_TAG",
        default_value = DEFAULT_NESTED_TAG,
        allow_hyphen_values = true,
        help = "Prefix attached to output forwarded from the broadcaster"
    )]
    pub nested_tag: String,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl HarnessCli {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "device-broadcaster",
    about = "Simulated network camera host controlled over stdin/stdout",
    version
)]
pub struct BroadcasterCli {
    #[arg(
        long,
        env = "BROADCASTER_DOMAIN",
        default_value_t = DEFAULT_DOMAIN,
        value_parser = clap::value_parser!(u32).range(0..=232),
        help = "Discovery domain to announce devices on"
    )]
    pub domain: u32,

    #[arg(
        long,
        env = "BROADCASTER_PARTICIPANT",
        default_value = "device-broadcaster",
        help = "Participant name of the broadcaster"
    )]
    pub participant: String,

    #[arg(
        long = "announce-interval-ms",
        env = "BROADCASTER_ANNOUNCE_INTERVAL_MS",
        default_value_t = DEFAULT_ANNOUNCE_INTERVAL.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Period between re-announcements of each live device"
    )]
    pub announce_interval_ms: u64,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl BroadcasterCli {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "HARNESS_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "HARNESS_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_defaults() {
        let cli = HarnessCli::try_parse_from(["discovery-harness"]).expect("parse");
        assert_eq!(cli.domain, 123);
        assert_eq!(cli.participant, "device-properties-client");
        assert_eq!(cli.ready_timeout(), Duration::from_secs(10));
        assert_eq!(cli.discovery_timeout(), Duration::from_secs(3));
        assert_eq!(cli.nested_tag, "  S");
        assert!(cli.broadcaster.is_none());
    }

    #[test]
    fn rejects_domain_out_of_range() {
        let result = HarnessCli::try_parse_from(["discovery-harness", "--domain", "233"]);
        assert!(result.is_err());
    }

    #[test]
    fn broadcaster_accepts_overrides() {
        let cli = BroadcasterCli::try_parse_from([
            "device-broadcaster",
            "--domain",
            "7",
            "--announce-interval-ms",
            "50",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        assert_eq!(cli.domain, 7);
        assert_eq!(cli.announce_interval(), Duration::from_millis(50));
        assert_eq!(cli.logging.level, LogLevel::Debug);
    }
}
