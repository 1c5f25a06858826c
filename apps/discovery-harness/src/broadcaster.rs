//! The remote side of the control channel: a participant that simulates
//! network cameras on request.
//!
//! Each live broadcast re-announces its device on a fixed interval so that
//! watchers opened later still see it. Closing a broadcast stops the
//! heartbeat before the offline announcement goes out, and the reply is only
//! written after both.

use device_discovery::DiscoveryContext;
use device_fixtures::DeviceModel;
use harness_proto::{
    encode_line, ControlFrame, ControlRequest, DeviceAnnouncement, DeviceInfo, ProductLine,
    ReadySignal, RemoteCommand, RemoteFrame, Reply,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::BroadcastError;

pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_millis(250);

/// How [`Broadcaster::serve`] came to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    Shutdown,
    ChannelClosed,
}

struct LiveBroadcast {
    topic_root: String,
    heartbeat: JoinHandle<()>,
}

pub struct Broadcaster {
    context: Arc<DiscoveryContext>,
    interval: Duration,
    live: HashMap<String, LiveBroadcast>,
}

impl Broadcaster {
    pub fn new(context: Arc<DiscoveryContext>, interval: Duration) -> Self {
        Self {
            context,
            interval,
            live: HashMap::new(),
        }
    }

    pub fn ready_signal(&self) -> ReadySignal {
        ReadySignal {
            participant: self.context.participant().to_string(),
            participant_guid: self.context.guid(),
            domain: self.context.domain(),
            pid: std::process::id(),
        }
    }

    /// Writes the ready frame, then answers requests in order until a
    /// shutdown request or the end of input. All broadcasts are closed on the
    /// way out.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<ServeExit, BroadcastError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let served = self.serve_inner(reader, &mut writer).await;
        self.close_all().await;
        served
    }

    async fn serve_inner<R, W>(&mut self, reader: R, writer: &mut W) -> Result<ServeExit, BroadcastError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_frame(writer, &RemoteFrame::Ready(self.ready_signal())).await?;

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request = match serde_json::from_str::<ControlFrame>(trimmed) {
                Ok(ControlFrame::Request(request)) => request,
                Err(err) => {
                    warn!(target: "broadcaster", line = trimmed, error = %err, "ignoring malformed request");
                    continue;
                }
            };
            let shutdown = matches!(request.command, RemoteCommand::Shutdown);
            let reply = self.handle(request).await;
            write_frame(writer, &RemoteFrame::Reply(reply)).await?;
            if shutdown {
                info!(target: "broadcaster", "shutdown requested");
                return Ok(ServeExit::Shutdown);
            }
        }
        info!(target: "broadcaster", "control channel closed");
        Ok(ServeExit::ChannelClosed)
    }

    pub async fn handle(&mut self, request: ControlRequest) -> Reply {
        let ControlRequest { id, command } = request;
        let verb = command.verb();
        debug!(target: "broadcaster", id, verb, command = %command.describe(), "handling request");
        let outcome = match command {
            RemoteCommand::Broadcast { bind, model, info } => self.broadcast(bind, &model, info),
            RemoteCommand::Close { name } => self.close(&name).await,
            RemoteCommand::Ping => return Reply::ok_with(id, "pong"),
            RemoteCommand::Shutdown => {
                self.close_all().await;
                Ok(())
            }
        };
        match outcome {
            Ok(()) => Reply::ok(id),
            Err(err) => {
                warn!(target: "broadcaster", id, verb, error = %err, "request failed");
                Reply::fault(id, err.to_string())
            }
        }
    }

    fn broadcast(&mut self, bind: String, model: &str, mut info: DeviceInfo) -> Result<(), BroadcastError> {
        if self.live.contains_key(&bind) {
            return Err(BroadcastError::AlreadyBound(bind));
        }
        let model: DeviceModel = model.parse()?;
        info.product_line |= ProductLine::SW_ONLY;
        let topic_root = info.topic_root.clone();
        let announcement = DeviceAnnouncement::Online(model.descriptor(info));
        self.context.announce(&announcement)?;

        let heartbeat = tokio::spawn(heartbeat(
            Arc::clone(&self.context),
            announcement,
            self.interval,
        ));
        info!(
            target: "broadcaster",
            bind = %bind,
            model = model.name(),
            topic_root = %topic_root,
            "broadcast started"
        );
        self.live.insert(bind, LiveBroadcast { topic_root, heartbeat });
        Ok(())
    }

    async fn close(&mut self, name: &str) -> Result<(), BroadcastError> {
        let live = self
            .live
            .remove(name)
            .ok_or_else(|| BroadcastError::UnknownObject(name.to_string()))?;
        live.heartbeat.abort();
        let _ = live.heartbeat.await;
        self.context.announce(&DeviceAnnouncement::Offline {
            topic_root: live.topic_root.clone(),
        })?;
        info!(target: "broadcaster", bind = name, topic_root = %live.topic_root, "broadcast closed");
        Ok(())
    }

    pub async fn close_all(&mut self) {
        let names: Vec<String> = self.live.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.close(&name).await {
                debug!(target: "broadcaster", bind = %name, error = %err, "close during teardown failed");
            }
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        for live in self.live.values() {
            live.heartbeat.abort();
        }
    }
}

async fn heartbeat(context: Arc<DiscoveryContext>, announcement: DeviceAnnouncement, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial announcement was
    // already published by the caller.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = context.announce(&announcement) {
            warn!(
                target: "broadcaster",
                topic_root = announcement.topic_root(),
                error = %err,
                "heartbeat stopped"
            );
            break;
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &RemoteFrame) -> Result<(), BroadcastError>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(frame)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_discovery::DiscoveryConfig;
    use harness_proto::ReplyStatus;
    use tokio::io::{duplex, BufReader, DuplexStream, Lines};
    use transport_bus::LocalBus;

    struct Harness {
        requests: DuplexStream,
        frames: Lines<BufReader<DuplexStream>>,
        context: Arc<DiscoveryContext>,
        server: JoinHandle<Result<ServeExit, BroadcastError>>,
        next_id: u64,
    }

    impl Harness {
        async fn start() -> Self {
            let context = Arc::new(DiscoveryContext::with_bus(
                Arc::new(LocalBus::new()),
                DiscoveryConfig::new(9, "broadcaster-test"),
                ProductLine::ANY | ProductLine::SW_ONLY,
            ));
            let (requests, server_in) = duplex(64 * 1024);
            let (server_out, frames) = duplex(64 * 1024);
            let server_context = Arc::clone(&context);
            let server = tokio::spawn(async move {
                let mut broadcaster = Broadcaster::new(server_context, Duration::from_millis(20));
                broadcaster.serve(BufReader::new(server_in), server_out).await
            });
            let mut harness = Self {
                requests,
                frames: BufReader::new(frames).lines(),
                context,
                server,
                next_id: 0,
            };
            match harness.next_frame().await {
                RemoteFrame::Ready(signal) => {
                    assert_eq!(signal.participant, "broadcaster-test");
                    assert_eq!(signal.domain, 9);
                }
                other => panic!("expected ready frame, got {other:?}"),
            }
            harness
        }

        async fn next_frame(&mut self) -> RemoteFrame {
            let line = self
                .frames
                .next_line()
                .await
                .expect("read frame")
                .expect("frame before eof");
            serde_json::from_str(&line).expect("decode frame")
        }

        async fn send(&mut self, command: RemoteCommand) -> Reply {
            self.next_id += 1;
            let line = encode_line(&ControlFrame::Request(ControlRequest {
                id: self.next_id,
                command,
            }))
            .expect("encode");
            self.requests.write_all(line.as_bytes()).await.expect("write");
            match self.next_frame().await {
                RemoteFrame::Reply(reply) => {
                    assert_eq!(reply.id, self.next_id);
                    reply
                }
                other => panic!("expected reply, got {other:?}"),
            }
        }
    }

    fn broadcast(bind: &str, model: DeviceModel) -> RemoteCommand {
        RemoteCommand::Broadcast {
            bind: bind.to_string(),
            model: model.name().to_string(),
            info: model.device_info(),
        }
    }

    #[tokio::test]
    async fn broadcast_is_discoverable_until_closed() {
        let mut harness = Harness::start().await;
        let mut watch = harness
            .context
            .wait_for_devices(ProductLine::SW_ONLY, Duration::from_millis(200));

        let reply = harness.send(broadcast("instance", DeviceModel::D405)).await;
        assert!(reply.is_ok());
        let device = watch.next().await.expect("device");
        assert_eq!(device.serial_number(), "0405");
        assert!(device.product_line().contains(ProductLine::SW_ONLY | ProductLine::D400));

        let reply = harness
            .send(RemoteCommand::Close {
                name: "instance".into(),
            })
            .await;
        assert!(reply.is_ok());

        let fresh = harness
            .context
            .wait_for_devices(ProductLine::SW_ONLY, Duration::from_millis(150));
        assert!(fresh.collect_all().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_duplicate_binding_and_unknown_names() {
        let mut harness = Harness::start().await;
        assert!(harness.send(broadcast("instance", DeviceModel::D455)).await.is_ok());

        let duplicate = harness.send(broadcast("instance", DeviceModel::D405)).await;
        assert_eq!(duplicate.status, ReplyStatus::Fault);
        assert_eq!(duplicate.message.as_deref(), Some("'instance' is already bound"));

        let unknown = harness
            .send(RemoteCommand::Close {
                name: "missing".into(),
            })
            .await;
        assert_eq!(unknown.message.as_deref(), Some("no such object 'missing'"));

        let bad_model = RemoteCommand::Broadcast {
            bind: "other".into(),
            model: "L515".into(),
            info: DeviceModel::D405.device_info(),
        };
        let reply = harness.send(bad_model).await;
        assert_eq!(reply.message.as_deref(), Some("unknown device model 'L515'"));
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let mut harness = Harness::start().await;
        let reply = harness.send(RemoteCommand::Ping).await;
        assert_eq!(reply.message.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let mut harness = Harness::start().await;
        harness
            .requests
            .write_all(b"this is not a request\n\n")
            .await
            .expect("write");
        assert!(harness.send(RemoteCommand::Ping).await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_broadcasts_and_stops_serving() {
        let mut harness = Harness::start().await;
        assert!(harness.send(broadcast("a", DeviceModel::D435i)).await.is_ok());
        assert!(harness.send(RemoteCommand::Shutdown).await.is_ok());

        let exit = harness.server.await.expect("join").expect("serve");
        assert_eq!(exit, ServeExit::Shutdown);
        let watch = harness
            .context
            .wait_for_devices(ProductLine::SW_ONLY, Duration::from_millis(100));
        assert!(watch.collect_all().await.is_empty());
    }

    #[tokio::test]
    async fn end_of_input_is_a_shutdown() {
        let Harness {
            requests, server, ..
        } = Harness::start().await;
        drop(requests);
        let exit = server.await.expect("join").expect("serve");
        assert_eq!(exit, ServeExit::ChannelClosed);
    }
}
