//! # relay-protocol
//!
//! Wire packet definitions for the Relay realtime messaging core.
//!
//! This crate defines the JSON packets exchanged between clients and the
//! server over a WebSocket session, plus the codec that enforces the
//! inbound frame-size ceiling.
//!
//! ## Packet Types
//!
//! - [`CommandEnvelope`] - inbound client command (heartbeat, chat, pull, ...)
//! - [`Packet`] - outbound reply or delivered-message notification
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Packet};
//!
//! let packet = Packet::heartbeat_ack();
//! let encoded = codec::encode(&packet).unwrap();
//! assert_eq!(encoded, "{\"cmd\":1,\"code\":0}");
//! ```

pub mod codec;
pub mod packet;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use packet::{Command, CommandEnvelope, Packet, CODE_OK};
