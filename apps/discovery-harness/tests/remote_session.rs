#![cfg(unix)]

use discovery_harness::error::RemoteError;
use discovery_harness::remote::{RemoteOptions, RemoteSession};
use harness_proto::RemoteCommand;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const READY_LINE: &str = r#"{"type":"ready","participant":"fake-host","participant_guid":"00000000-0000-0000-0000-000000000000","domain":5,"pid":1}"#;

/// Replies ok to everything except `close`, which faults; exits on shutdown.
fn responsive_script() -> String {
    format!(
        r#"echo "booting simulated host"
echo '{READY_LINE}'
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"verb":"close"'*) printf '{{"type":"reply","id":%s,"status":"fault","message":"no such object"}}\n' "$id" ;;
    *'"verb":"shutdown"'*) printf '{{"type":"reply","id":%s,"status":"ok"}}\n' "$id"; exit 0 ;;
    *) echo "log noise between replies"; printf '{{"type":"reply","id":%s,"status":"ok"}}\n' "$id" ;;
  esac
done
"#
    )
}

struct FakeRemote {
    _dir: TempDir,
    script: PathBuf,
}

impl FakeRemote {
    fn new(body: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let script = dir.path().join("fake-broadcaster.sh");
        fs::write(&script, body).expect("write script");
        Self { _dir: dir, script }
    }

    // Run through the shell so the script needs no exec bit.
    fn start(&self, options: RemoteOptions) -> Result<RemoteSession, RemoteError> {
        let options = options.with_args([self.script.to_string_lossy().into_owned()]);
        RemoteSession::start("/bin/sh", options)
    }
}

fn options() -> RemoteOptions {
    RemoteOptions::default()
        .with_tag("  S")
        .with_ready_timeout(Duration::from_secs(5))
        .with_shutdown_grace(Duration::from_millis(500))
}

#[tokio::test]
async fn waits_for_ready_and_round_trips_commands() {
    let fake = FakeRemote::new(&responsive_script());
    let mut remote = fake.start(options()).expect("start");

    let ready = remote.wait_until_ready().await.expect("ready");
    assert_eq!(ready.participant, "fake-host");
    assert_eq!(ready.domain, 5);
    // Idempotent once ready.
    assert!(remote.wait_until_ready().await.is_ok());

    let first = remote.run(RemoteCommand::Ping).await.expect("ping");
    let second = remote.run(RemoteCommand::Ping).await.expect("ping");
    assert_eq!((first.id, second.id), (1, 2));

    let status = remote.close().await.expect("close");
    assert_eq!(status, "exit code 0");
}

#[tokio::test]
async fn fault_reply_becomes_execution_error() {
    let fake = FakeRemote::new(&responsive_script());
    let mut remote = fake.start(options()).expect("start");
    remote.wait_until_ready().await.expect("ready");

    let err = remote
        .run(RemoteCommand::Close {
            name: "instance".into(),
        })
        .await
        .expect_err("close faults");
    match err {
        RemoteError::Execution { command, message } => {
            assert_eq!(command, "close(instance)");
            assert_eq!(message, "no such object");
        }
        other => panic!("unexpected error {other:?}"),
    }
    // The session stays usable after a fault.
    assert!(remote.run(RemoteCommand::Ping).await.is_ok());
}

#[tokio::test]
async fn commands_require_readiness() {
    let fake = FakeRemote::new(&responsive_script());
    let mut remote = fake.start(options()).expect("start");
    let err = remote.run(RemoteCommand::Ping).await.expect_err("not ready");
    assert!(matches!(err, RemoteError::NotReady));
}

#[tokio::test]
async fn readiness_times_out_with_captured_output() {
    let fake = FakeRemote::new("echo 'still booting'\nexec sleep 30\n");
    let mut remote = fake
        .start(options().with_ready_timeout(Duration::from_millis(300)))
        .expect("start");

    let started = Instant::now();
    let err = remote.wait_until_ready().await.expect_err("timeout");
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        RemoteError::ReadinessTimeout { timeout, captured } => {
            assert_eq!(timeout, Duration::from_millis(300));
            assert_eq!(captured, ["still booting"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn early_exit_is_distinct_from_timeout() {
    let fake = FakeRemote::new("echo 'fatal: no participant'\nexit 3\n");
    let mut remote = fake.start(options()).expect("start");
    match remote.wait_until_ready().await.expect_err("exited") {
        RemoteError::ExitedBeforeReady { status, captured } => {
            assert_eq!(status, "exit code 3");
            assert_eq!(captured, ["fatal: no participant"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn remote_exit_mid_command_is_an_execution_error() {
    let fake = FakeRemote::new(&format!("echo '{READY_LINE}'\nread -r line\nexit 0\n"));
    let mut remote = fake.start(options()).expect("start");
    remote.wait_until_ready().await.expect("ready");

    match remote.run(RemoteCommand::Ping).await.expect_err("exited") {
        RemoteError::Execution { message, .. } => assert_eq!(message, "remote process exited"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn close_kills_a_remote_that_ignores_shutdown() {
    let fake = FakeRemote::new(&format!("echo '{READY_LINE}'\nexec sleep 30\n"));
    let mut remote = fake
        .start(options().with_shutdown_grace(Duration::from_millis(200)))
        .expect("start");
    remote.wait_until_ready().await.expect("ready");

    let started = Instant::now();
    let status = remote.close().await.expect("close");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(status, "signal 9");
}

#[tokio::test]
async fn launch_failure_names_the_program() {
    let err = RemoteSession::start("/nonexistent/device-broadcaster", options())
        .err()
        .expect("launch fails");
    match err {
        RemoteError::Launch { path, .. } => {
            assert_eq!(path, PathBuf::from("/nonexistent/device-broadcaster"))
        }
        other => panic!("unexpected error {other:?}"),
    }
}
