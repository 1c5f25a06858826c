//! Control of the broadcaster process.
//!
//! A [`RemoteSession`] owns the child process and both ends of its
//! newline-delimited JSON control channel. Commands are strictly sequential:
//! every request waits for the reply carrying its id before `run` returns.
//! Whatever way the session goes out of scope, the child is killed and
//! reaped.

use harness_proto::{
    encode_line, ControlFrame, ControlRequest, ReadySignal, RemoteCommand, RemoteFrame, Reply,
};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::cli::DEFAULT_NESTED_TAG;
use crate::error::RemoteError;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const MAX_CAPTURED_LINES: usize = 32;

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub args: Vec<String>,
    /// Prefix for the remote's forwarded stderr lines.
    pub tag: String,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            tag: DEFAULT_NESTED_TAG.to_string(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl RemoteOptions {
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }
}

pub struct RemoteSession {
    program: PathBuf,
    options: RemoteOptions,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    ready: Option<ReadySignal>,
    next_id: u64,
}

impl RemoteSession {
    /// Spawns `program` with piped stdio. Must be called from within a tokio
    /// runtime.
    pub fn start(program: impl AsRef<Path>, options: RemoteOptions) -> Result<Self, RemoteError> {
        let program = program.as_ref().to_path_buf();
        let mut command = TokioCommand::new(&program);
        command
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            target: "harness::remote",
            program = %program.display(),
            args = ?options.args,
            "launching remote process"
        );

        let mut child = command.spawn().map_err(|source| RemoteError::Launch {
            path: program.clone(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RemoteError::Protocol("remote stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::Protocol("remote stdout unavailable".into()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_child_lines(
                BufReader::new(stderr),
                options.tag.clone(),
            ))
        });

        Ok(Self {
            program,
            options,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr_task,
            ready: None,
            next_id: 0,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn tag(&self) -> &str {
        &self.options.tag
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    pub fn ready_signal(&self) -> Option<&ReadySignal> {
        self.ready.as_ref()
    }

    /// Blocks until the remote announces readiness on its control channel.
    ///
    /// Lines that are not protocol frames are skipped (and reported with the
    /// error if readiness never comes). Returns immediately once ready.
    pub async fn wait_until_ready(&mut self) -> Result<&ReadySignal, RemoteError> {
        if self.ready.is_none() {
            let signal = self.read_ready_signal().await?;
            info!(
                target: "harness::remote",
                participant = %signal.participant,
                guid = %signal.participant_guid,
                domain = signal.domain,
                pid = signal.pid,
                "remote ready"
            );
            self.ready = Some(signal);
        }
        self.ready.as_ref().ok_or(RemoteError::NotReady)
    }

    async fn read_ready_signal(&mut self) -> Result<ReadySignal, RemoteError> {
        let wait = self.options.ready_timeout;
        let deadline = Instant::now() + wait;
        let mut captured = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = match timeout_at(deadline, self.stdout.read_line(&mut line)).await {
                Ok(read) => read?,
                Err(_) => {
                    warn!(
                        target: "harness::remote",
                        timeout_ms = wait.as_millis() as u64,
                        "remote did not signal readiness in time"
                    );
                    return Err(RemoteError::ReadinessTimeout {
                        timeout: wait,
                        captured,
                    });
                }
            };
            if read == 0 {
                let status = self.exit_status_after_eof().await;
                return Err(RemoteError::ExitedBeforeReady { status, captured });
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RemoteFrame>(trimmed) {
                Ok(RemoteFrame::Ready(signal)) => return Ok(signal),
                Ok(RemoteFrame::Reply(reply)) => {
                    debug!(
                        target: "harness::remote",
                        id = reply.id,
                        "ignoring reply received before readiness"
                    );
                }
                Err(err) => {
                    if captured.len() < MAX_CAPTURED_LINES {
                        captured.push(trimmed.to_string());
                    }
                    debug!(
                        target: "harness::remote",
                        line = trimmed,
                        error = %err,
                        "ignoring non-protocol output"
                    );
                }
            }
        }
    }

    /// Sends one command and waits for its reply. A fault reply or the
    /// remote going away surfaces as [`RemoteError::Execution`].
    pub async fn run(&mut self, command: RemoteCommand) -> Result<Reply, RemoteError> {
        if self.ready.is_none() {
            return Err(RemoteError::NotReady);
        }
        self.next_id += 1;
        let id = self.next_id;
        let description = command.describe();
        let verb = command.verb();
        let line = encode_line(&ControlFrame::Request(ControlRequest { id, command }))
            .map_err(|err| RemoteError::Protocol(err.to_string()))?;

        debug!(
            target: "harness::remote",
            id,
            verb,
            command = %description,
            "sending remote command"
        );
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(exited(description));
        };
        if let Err(err) = write_line(stdin, &line).await {
            return Err(match err.kind() {
                std::io::ErrorKind::BrokenPipe => exited(description),
                _ => RemoteError::Channel(err),
            });
        }

        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stdout.read_line(&mut buf).await? == 0 {
                return Err(exited(description));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RemoteFrame>(trimmed) {
                Ok(RemoteFrame::Reply(reply)) if reply.id == id => {
                    if reply.is_ok() {
                        debug!(target: "harness::remote", id, command = %description, "remote command ok");
                        return Ok(reply);
                    }
                    let message = reply
                        .message
                        .unwrap_or_else(|| "remote reported a fault".to_string());
                    return Err(RemoteError::Execution {
                        command: description,
                        message,
                    });
                }
                Ok(RemoteFrame::Reply(reply)) => {
                    warn!(
                        target: "harness::remote",
                        expected = id,
                        received = reply.id,
                        "discarding reply for another request"
                    );
                }
                Ok(RemoteFrame::Ready(_)) => {
                    warn!(target: "harness::remote", "unexpected second readiness signal");
                }
                Err(err) => {
                    debug!(
                        target: "harness::remote",
                        line = trimmed,
                        error = %err,
                        "ignoring non-protocol output"
                    );
                }
            }
        }
    }

    /// Asks the remote to shut down and waits for it to exit, killing it if
    /// it outlives the shutdown grace period. Returns a description of the
    /// exit status.
    pub async fn close(mut self) -> Result<String, RemoteError> {
        let grace = self.options.shutdown_grace;
        if self.is_ready() && self.stdin.is_some() {
            match timeout(grace, self.run(RemoteCommand::Shutdown)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    debug!(target: "harness::remote", error = %err, "shutdown request failed");
                }
                Err(_) => {
                    debug!(target: "harness::remote", "shutdown request not acknowledged in time");
                }
            }
        }
        // Closing stdin is a shutdown signal in its own right.
        self.stdin.take();

        let status = match timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    target: "harness::remote",
                    grace_ms = grace.as_millis() as u64,
                    "remote did not exit in time; killing"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        let described = describe_exit_status(status);
        info!(
            target: "harness::remote",
            program = %self.program.display(),
            status = %described,
            "remote process exited"
        );
        Ok(described)
    }

    async fn exit_status_after_eof(&mut self) -> String {
        match timeout(Duration::from_secs(1), self.child.wait()).await {
            Ok(Ok(status)) => describe_exit_status(status),
            Ok(Err(err)) => format!("wait failed: {err}"),
            Err(_) => "closed its output but is still running".to_string(),
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(
                target: "harness::remote",
                program = %self.program.display(),
                "remote session dropped while process still running; killing"
            );
            if let Err(err) = self.child.start_kill() {
                warn!(target: "harness::remote", error = %err, "failed to kill remote process");
            }
        }
    }
}

fn exited(command: String) -> RemoteError {
    RemoteError::Execution {
        command,
        message: "remote process exited".to_string(),
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn forward_child_lines<R>(mut reader: BufReader<R>, tag: String)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    info!(target: "harness::remote", "{tag}{trimmed}");
                }
            }
            Err(err) => {
                warn!(target: "harness::remote", error = %err, "failed to read remote stderr");
                break;
            }
        }
    }
}

pub fn describe_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown status".to_string()
}
