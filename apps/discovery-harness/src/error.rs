use device_discovery::DiscoveryError;
use device_fixtures::UnknownModel;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to launch {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote process not ready after {}ms{}", .timeout.as_millis(), output_suffix(.captured))]
    ReadinessTimeout {
        timeout: Duration,
        captured: Vec<String>,
    },
    #[error("remote process exited before signalling readiness ({status}){}", output_suffix(.captured))]
    ExitedBeforeReady {
        status: String,
        captured: Vec<String>,
    },
    #[error("remote process has not signalled readiness")]
    NotReady,
    #[error("remote command `{command}` failed: {message}")]
    Execution { command: String, message: String },
    #[error("control channel error: {0}")]
    Channel(#[from] io::Error),
    #[error("control protocol error: {0}")]
    Protocol(String),
}

fn output_suffix(captured: &[String]) -> String {
    if captured.is_empty() {
        String::new()
    } else {
        format!("; output: {}", captured.join(" | "))
    }
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unable to locate broadcaster executable: {0}")]
    BroadcasterPath(String),
    #[error("broadcaster failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
}

/// Errors confined to one scenario; the run moves on to the next one.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Failures of the broadcaster's own request handling. Most are reported
/// back to the harness as fault replies.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("'{0}' is already bound")]
    AlreadyBound(String),
    #[error("no such object '{0}'")]
    UnknownObject(String),
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),
    #[error("announcement failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("control channel error: {0}")]
    Channel(#[from] io::Error),
    #[error("failed to encode control frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_errors_carry_captured_output() {
        let err = RemoteError::ExitedBeforeReady {
            status: "exit code 3".into(),
            captured: vec!["boot".into(), "crash".into()],
        };
        assert_eq!(
            err.to_string(),
            "remote process exited before signalling readiness (exit code 3); output: boot | crash"
        );

        let err = RemoteError::ReadinessTimeout {
            timeout: Duration::from_millis(250),
            captured: Vec::new(),
        };
        assert_eq!(err.to_string(), "remote process not ready after 250ms");
    }
}
