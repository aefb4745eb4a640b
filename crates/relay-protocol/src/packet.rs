//! Packet types for the Relay protocol.
//!
//! Clients send command envelopes; the server answers with outbound
//! packets. Both are field-named JSON objects so the wire stays inspectable
//! and new optional fields remain backwards-compatible.

use serde::{Deserialize, Serialize};

/// Status code for a successful reply.
pub const CODE_OK: i32 = 0;

/// Known command codes.
///
/// The envelope itself carries a raw `u32` so that unknown codes still
/// decode; dispatch resolves them through [`Command::try_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Client keepalive; answered with a fixed zero-status ack.
    Heartbeat = 1,
    /// Session authentication (routing not yet wired).
    Login = 2,
    /// Delivered-message notification / chat send.
    Chat = 3,
    /// Timeline catch-up request (routing not yet wired).
    Pull = 4,
    /// Read-watermark acknowledgment (routing not yet wired).
    Ack = 5,
}

impl Command {
    /// The wire code for this command.
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<Command> for u32 {
    fn from(cmd: Command) -> u32 {
        cmd as u32
    }
}

impl TryFrom<u32> for Command {
    type Error = &'static str;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Heartbeat),
            2 => Ok(Command::Login),
            3 => Ok(Command::Chat),
            4 => Ok(Command::Pull),
            5 => Ok(Command::Ack),
            _ => Err("unknown command code"),
        }
    }
}

/// An inbound client command.
///
/// `cmd` is kept raw: a code the server does not recognize is logged and
/// skipped by the session handler, never a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command code.
    pub cmd: u32,

    /// Client-assigned message identifier, where the command carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,

    /// Command payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandEnvelope {
    /// Create a new envelope with just a command code.
    #[must_use]
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd: cmd.code(),
            msg_id: None,
            payload: None,
        }
    }

    /// Attach a message identifier.
    #[must_use]
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Resolve the raw code into a known command, if it is one.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.cmd).ok()
    }
}

/// An outbound packet.
///
/// Ephemeral by design: heartbeat acks and delivered-message notifications
/// are built, written to the session, and dropped. Nothing here is
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Command code this packet answers or announces.
    pub cmd: u32,

    /// Application status code; 0 = success.
    pub code: i32,

    /// Message identifier, for packets about one message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,

    /// Per-conversation sequence number, for delivered messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// Packet payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Packet {
    /// Create a success packet for a command.
    #[must_use]
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd: cmd.code(),
            code: CODE_OK,
            msg_id: None,
            seq: None,
            payload: None,
        }
    }

    /// The fixed heartbeat acknowledgment.
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(Command::Heartbeat)
    }

    /// Attach a message identifier.
    #[must_use]
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    /// Attach a sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
