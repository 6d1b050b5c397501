//! Transport abstraction under the overlay
//!
//! The overlay never talks to iroh directly. Everything below the envelope
//! layer goes through this trait so tests can run on an in-memory hub and
//! the broadcast strategy can be picked per transport capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::MeshResult;

/// Opaque transport-level peer address. For the iroh transport this is the
/// z-base-32 node id string; for the in-memory transport an arbitrary label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerHandle(pub String);

impl PeerHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw inbound bytes with the transport-level sender, before any envelope
/// decoding has happened.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from: PeerHandle,
    pub bytes: Vec<u8>,
}

/// Message-passing surface the overlay is built on.
///
/// `subscribe` always establishes the inbound mailbox for a topic, whether
/// or not the transport has real pubsub: direct sends addressed to us are
/// delivered into the same stream. `supports_pubsub` is probed once per
/// session to pick between topic broadcast and per-member fanout.
#[async_trait]
pub trait Transport: Send + Sync {
    fn supports_pubsub(&self) -> bool;

    /// Our own transport-level address, as peers will see it.
    fn local_handle(&self) -> PeerHandle;

    async fn subscribe(&self, topic: &str) -> MeshResult<mpsc::Receiver<InboundMessage>>;

    async fn unsubscribe(&self, topic: &str) -> MeshResult<()>;

    /// Broadcast to every subscriber of the topic. Only meaningful when
    /// `supports_pubsub` is true.
    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> MeshResult<()>;

    async fn send_direct(&self, peer: &PeerHandle, bytes: Vec<u8>) -> MeshResult<()>;

    fn connected(&self) -> bool;
}
