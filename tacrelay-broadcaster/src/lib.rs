//! Broadcast core for the tacrelay CoT server
//!
//! This crate owns the fan-out machinery between connected peers:
//!
//! - `ClientRegistry` - concurrent directory from `ClientId` to that client's
//!   bounded outbound channel
//! - `BroadcastRouter` - the single consumer of all inbound CoT messages;
//!   delivers each one to every registered client except its sender
//!
//! Backpressure policy: a receiver whose outbound queue is full (or whose
//! session is gone) is dropped from the registry at the end of the fan-out
//! pass. One slow peer never blocks delivery to healthy peers, and never
//! blocks the router itself. Delivery is at-most-once and fire-and-forget;
//! CoT events carry their own staleness, so there is nothing to retry.
//!
//! Message payloads are immutable `Arc<str>` documents, shared by reference
//! across every outbound queue holding them.

pub mod client;
pub mod error;
pub mod router;

pub use client::{ClientId, ClientRegistry, Message};
pub use error::{BroadcasterError, Result};
pub use router::{BroadcastRouter, RouterStats};
