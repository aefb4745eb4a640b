//! # relay-core
//!
//! Connection registry, message sequencing, and delivery services for the
//! Relay realtime messaging core.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - identity-keyed table of live session handles
//! - **Sequencer** - ordered, idempotent timeline writes
//! - **PushService** - fan-out of packets to connected recipients
//! - **PullService** - cursor-paginated catch-up and ack watermarks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Registry   │◀────│ PushService │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!
//! ┌─────────────┐     ┌───────────────┐   ┌─────────────┐
//! │  Sequencer  │────▶│ TimelineStore │◀──│ PullService │
//! └─────────────┘     └───────────────┘   └─────────────┘
//! ```

pub mod pull;
pub mod push;
pub mod registry;
pub mod sequencer;
pub mod timeline;

pub use pull::{PullResult, PullService};
pub use push::{BroadcastError, PushService};
pub use registry::{Registry, Session, SessionError, SharedSession};
pub use sequencer::Sequencer;
pub use timeline::{NewMessage, StoreError, TimelineMessage, TimelineStore, DEFAULT_MSG_TYPE};
