//! Organization overlay network
//!
//! One gossip topic per organization (`/org/<base58>/v1`) carrying JSON
//! envelopes. The overlay tracks who is online via heartbeat and discovery
//! rounds, broadcasts through the transport's pubsub when it has one and
//! falls back to direct per-member fanout when it does not, and re-emits
//! knowledge-bearing envelopes as events for the sync engine above.

pub mod envelope;
pub mod events;
pub mod iroh;
pub mod memory;
pub mod network;
pub mod presence;
mod session;
pub mod transport;

pub use envelope::{Envelope, Payload, SyncEntry};
pub use events::OverlayEvent;
pub use self::iroh::IrohTransport;
pub use memory::{MemoryHub, MemoryTransport};
pub use network::{LocalIdentity, OverlayConfig, OverlayNetwork};
pub use presence::{OnlineMember, OnlineSet};
pub use transport::{InboundMessage, PeerHandle, Transport};

use crate::types::OrgId;

/// Gossip topic name for an organization.
pub fn org_topic(org_id: &OrgId) -> String {
    format!("/org/{}/v1", org_id.to_base58())
}
