//! In-memory transport for tests and single-process wiring
//!
//! A [`MemoryHub`] connects any number of [`MemoryTransport`] nodes.
//! Publishing delivers to every other node subscribed to the topic (no
//! self-echo, matching gossip behavior); direct sends land in all of the
//! recipient's topic mailboxes. Nodes can be created without pubsub to
//! exercise the direct-fanout broadcast strategy, toggled offline, and
//! given injected direct-send failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{MeshError, MeshResult};

use super::transport::{InboundMessage, PeerHandle, Transport};

const MAILBOX_CAPACITY: usize = 256;

#[derive(Default)]
struct HubInner {
    // node -> topic -> mailbox
    topics: HashMap<PeerHandle, HashMap<String, mpsc::Sender<InboundMessage>>>,
    // direct sends to these peers fail with a network error
    failing: HashSet<PeerHandle>,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self, name: &str) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            handle: PeerHandle::from(name),
            pubsub: true,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A node whose transport reports no pubsub capability, forcing the
    /// overlay into direct per-member fanout.
    pub fn transport_without_pubsub(&self, name: &str) -> MemoryTransport {
        MemoryTransport {
            pubsub: false,
            ..self.transport(name)
        }
    }

    /// Make every direct send to `peer` fail until cleared.
    pub fn fail_direct_to(&self, peer: &PeerHandle) {
        self.inner.lock().failing.insert(peer.clone());
    }

    pub fn clear_direct_failure(&self, peer: &PeerHandle) {
        self.inner.lock().failing.remove(peer);
    }

    fn deliver_publish(&self, from: &PeerHandle, topic: &str, bytes: &[u8]) {
        let senders: Vec<mpsc::Sender<InboundMessage>> = {
            let inner = self.inner.lock();
            inner
                .topics
                .iter()
                .filter(|(node, _)| *node != from)
                .filter_map(|(_, topics)| topics.get(topic).cloned())
                .collect()
        };
        for sender in senders {
            // Lossy on a full mailbox, like a real network.
            let _ = sender.try_send(InboundMessage {
                from: from.clone(),
                bytes: bytes.to_vec(),
            });
        }
    }

    fn deliver_direct(&self, from: &PeerHandle, to: &PeerHandle, bytes: &[u8]) -> MeshResult<()> {
        let senders: Vec<mpsc::Sender<InboundMessage>> = {
            let inner = self.inner.lock();
            if inner.failing.contains(to) {
                return Err(MeshError::Network(format!("direct send to {to} failed")));
            }
            match inner.topics.get(to) {
                Some(topics) if !topics.is_empty() => topics.values().cloned().collect(),
                _ => return Err(MeshError::Network(format!("peer {to} unreachable"))),
            }
        };
        for sender in senders {
            let _ = sender.try_send(InboundMessage {
                from: from.clone(),
                bytes: bytes.to_vec(),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    handle: PeerHandle,
    pubsub: bool,
    connected: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Simulate losing or regaining connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn supports_pubsub(&self) -> bool {
        self.pubsub
    }

    fn local_handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    async fn subscribe(&self, topic: &str) -> MeshResult<mpsc::Receiver<InboundMessage>> {
        // Real transports suspend while joining a topic; keep that await
        // point so callers racing through subscribe get interleaved here.
        tokio::task::yield_now().await;
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.hub
            .inner
            .lock()
            .topics
            .entry(self.handle.clone())
            .or_default()
            .insert(topic.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> MeshResult<()> {
        if let Some(topics) = self.hub.inner.lock().topics.get_mut(&self.handle) {
            topics.remove(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> MeshResult<()> {
        if !self.connected() {
            return Err(MeshError::Network("transport disconnected".to_string()));
        }
        self.hub.deliver_publish(&self.handle, topic, &bytes);
        Ok(())
    }

    async fn send_direct(&self, peer: &PeerHandle, bytes: Vec<u8>) -> MeshResult<()> {
        if !self.connected() {
            return Err(MeshError::Network("transport disconnected".to_string()));
        }
        self.hub.deliver_direct(&self.handle, peer, &bytes)
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
