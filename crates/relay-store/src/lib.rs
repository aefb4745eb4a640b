//! # relay-store
//!
//! SQLite-backed implementation of the Relay timeline storage collaborator.
//!
//! The store owns the two durable tables the delivery core shares across
//! processes: the per-conversation message timeline and the per-user ack
//! watermarks. All mutations go through transactional, conflict-safe
//! statements; the schema's unique indexes back the sequencing invariants.

pub mod database;
pub mod schema;
pub mod timeline;

pub use database::Database;
pub use timeline::SqliteTimeline;
