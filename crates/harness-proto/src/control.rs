use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceInfo;

/// Frames the broadcaster writes to its stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteFrame {
    Ready(ReadySignal),
    Reply(Reply),
}

/// Emitted once, after the broadcaster has bound its participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySignal {
    pub participant: String,
    pub participant_guid: Uuid,
    pub domain: u32,
    pub pid: u32,
}

/// Frames the harness writes to the broadcaster's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Request(ControlRequest),
}

/// A single instruction for the broadcaster, tagged with a sequence id that
/// the matching [`Reply`] echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: u64,
    pub command: RemoteCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Construct a simulated device of `model` with the given identity, start
    /// announcing it, and bind the running broadcast to `bind`.
    Broadcast {
        bind: String,
        model: String,
        info: DeviceInfo,
    },
    /// Tear down the broadcast bound to `name`.
    Close { name: String },
    Ping,
    Shutdown,
}

impl RemoteCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            RemoteCommand::Broadcast { .. } => "broadcast",
            RemoteCommand::Close { .. } => "close",
            RemoteCommand::Ping => "ping",
            RemoteCommand::Shutdown => "shutdown",
        }
    }

    /// Short human-readable rendering used in logs and failure reports.
    pub fn describe(&self) -> String {
        match self {
            RemoteCommand::Broadcast { bind, model, info } => {
                format!("{bind} = broadcast({model}, serial {})", info.serial)
            }
            RemoteCommand::Close { name } => format!("close({name})"),
            RemoteCommand::Ping => "ping".to_string(),
            RemoteCommand::Shutdown => "shutdown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl Reply {
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            status: ReplyStatus::Ok,
            message: None,
        }
    }

    pub fn ok_with(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ReplyStatus::Ok,
            message: Some(message.into()),
        }
    }

    pub fn fault(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ReplyStatus::Fault,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ProductLine;

    #[test]
    fn request_uses_verb_tag() {
        let request = ControlRequest {
            id: 7,
            command: RemoteCommand::Close {
                name: "instance".into(),
            },
        };
        let value = serde_json::to_value(ControlFrame::Request(request)).expect("serialize");
        assert_eq!(value["type"], "request");
        assert_eq!(value["id"], 7);
        assert_eq!(value["command"]["verb"], "close");
        assert_eq!(value["command"]["name"], "instance");
    }

    #[test]
    fn parses_fault_reply_frame() {
        let raw = r#"{"type":"reply","id":3,"status":"fault","message":"no such object 'x'"}"#;
        let frame: RemoteFrame = serde_json::from_str(raw).expect("parse");
        match frame {
            RemoteFrame::Reply(reply) => {
                assert_eq!(reply.id, 3);
                assert!(!reply.is_ok());
                assert_eq!(reply.message.as_deref(), Some("no such object 'x'"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn ok_reply_omits_message() {
        let line = crate::encode_line(&RemoteFrame::Reply(Reply::ok(1))).expect("encode");
        assert_eq!(line, "{\"type\":\"reply\",\"id\":1,\"status\":\"ok\"}\n");
    }

    #[test]
    fn broadcast_description_names_binding_and_serial() {
        let command = RemoteCommand::Broadcast {
            bind: "instance".into(),
            model: "D405".into(),
            info: DeviceInfo {
                name: "Intel RealSense D405".into(),
                serial: "0405".into(),
                product_line: ProductLine::D400,
                topic_root: "realsense/D405_0405".into(),
            },
        };
        assert_eq!(command.verb(), "broadcast");
        assert_eq!(command.describe(), "instance = broadcast(D405, serial 0405)");
    }
}
