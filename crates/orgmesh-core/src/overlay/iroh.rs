//! iroh-backed transport
//!
//! Gossip carries topic broadcasts; a dedicated ALPN carries direct unicast
//! envelopes. Topic names hash to gossip topic ids with blake3. Direct
//! messages do not name a topic, so inbound ones are delivered to every
//! subscribed mailbox and the per-organization sessions filter by org id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use iroh::discovery::static_provider::StaticProvider;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey};
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use iroh_gossip::proto::TopicId;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};

use super::transport::{InboundMessage, PeerHandle, Transport};

/// ALPN for direct envelope unicast.
pub const DIRECT_ALPN: &[u8] = b"/orgmesh/direct/1";

/// Gossip default is 4KB; knowledge payloads and CRDT updates can be much
/// larger.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const MAILBOX_CAPACITY: usize = 256;

type Inboxes = Arc<Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>>;

struct TopicSub {
    sender: Arc<AsyncMutex<iroh_gossip::api::GossipSender>>,
    pump: JoinHandle<()>,
}

pub struct IrohTransport {
    endpoint: Endpoint,
    gossip: Gossip,
    #[allow(dead_code)]
    router: Router,
    static_provider: StaticProvider,
    subs: Mutex<HashMap<String, TopicSub>>,
    inboxes: Inboxes,
    bootstrap: Mutex<Vec<EndpointId>>,
    connected: AtomicBool,
}

impl IrohTransport {
    pub async fn new() -> MeshResult<Self> {
        Self::with_secret_key(None).await
    }

    /// Bind an endpoint, spawn gossip, and register the direct-message
    /// handler. A fixed secret key gives a stable peer handle across
    /// restarts.
    pub async fn with_secret_key(secret_key: Option<SecretKey>) -> MeshResult<Self> {
        let secret_key = secret_key.unwrap_or_else(|| SecretKey::generate(&mut rand::rng()));
        let static_provider = StaticProvider::new();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![GOSSIP_ALPN.to_vec(), DIRECT_ALPN.to_vec()])
            .discovery(static_provider.clone())
            .bind()
            .await
            .map_err(|e| MeshError::Network(format!("failed to bind endpoint: {e}")))?;

        let endpoint_id = endpoint.id();
        info!(%endpoint_id, "endpoint bound");

        let gossip = Gossip::builder()
            .max_message_size(MAX_MESSAGE_SIZE)
            .spawn(endpoint.clone());

        let inboxes: Inboxes = Arc::new(Mutex::new(HashMap::new()));
        let handler = DirectHandler {
            inboxes: inboxes.clone(),
        };
        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .accept(DIRECT_ALPN, handler)
            .spawn();

        Ok(Self {
            endpoint,
            gossip,
            router,
            static_provider,
            subs: Mutex::new(HashMap::new()),
            inboxes,
            bootstrap: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Register an out-of-band peer address for discovery and use it to
    /// bootstrap future topic subscriptions.
    pub fn add_peer_addr(&self, addr: EndpointAddr) {
        debug!(peer = %addr.id, "adding peer address to static discovery");
        let mut bootstrap = self.bootstrap.lock();
        if !bootstrap.contains(&addr.id) {
            bootstrap.push(addr.id);
        }
        self.static_provider.add_endpoint_info(addr);
    }

    /// Let embedders reflect OS-level connectivity. Offline transports make
    /// the engine queue broadcasts instead of sending them.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn topic_id(topic: &str) -> TopicId {
        TopicId::from_bytes(*blake3::hash(topic.as_bytes()).as_bytes())
    }
}

#[async_trait]
impl Transport for IrohTransport {
    fn supports_pubsub(&self) -> bool {
        true
    }

    fn local_handle(&self) -> PeerHandle {
        PeerHandle(self.endpoint.id().to_string())
    }

    async fn subscribe(&self, topic: &str) -> MeshResult<mpsc::Receiver<InboundMessage>> {
        let topic_id = Self::topic_id(topic);
        let bootstrap = self.bootstrap.lock().clone();
        info!(%topic, ?topic_id, peers = bootstrap.len(), "subscribing to gossip topic");

        let gossip_topic = self
            .gossip
            .subscribe(topic_id, bootstrap)
            .await
            .map_err(|e| MeshError::Network(format!("failed to subscribe: {e}")))?;
        let (sender, mut receiver) = gossip_topic.split();

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.inboxes.lock().insert(topic.to_string(), tx.clone());

        let pump_topic = topic.to_string();
        let pump = tokio::spawn(async move {
            use iroh_gossip::api::Event;
            use n0_future::StreamExt;

            loop {
                match receiver.try_next().await {
                    Ok(Some(Event::Received(msg))) => {
                        let inbound = InboundMessage {
                            from: PeerHandle(msg.delivered_from.to_string()),
                            bytes: msg.content.to_vec(),
                        };
                        if tx.send(inbound).await.is_err() {
                            debug!(topic = %pump_topic, "mailbox dropped, stopping pump");
                            return;
                        }
                    }
                    Ok(Some(Event::NeighborUp(peer))) => {
                        debug!(topic = %pump_topic, %peer, "neighbor joined");
                    }
                    Ok(Some(Event::NeighborDown(peer))) => {
                        debug!(topic = %pump_topic, %peer, "neighbor left");
                    }
                    Ok(Some(Event::Lagged)) => {
                        warn!(topic = %pump_topic, "lagged behind on topic");
                    }
                    Ok(None) => {
                        debug!(topic = %pump_topic, "topic subscription closed");
                        return;
                    }
                    Err(e) => {
                        warn!(topic = %pump_topic, error = ?e, "error receiving from topic");
                        return;
                    }
                }
            }
        });

        let sub = TopicSub {
            sender: Arc::new(AsyncMutex::new(sender)),
            pump,
        };
        if let Some(old) = self.subs.lock().insert(topic.to_string(), sub) {
            old.pump.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> MeshResult<()> {
        if let Some(sub) = self.subs.lock().remove(topic) {
            sub.pump.abort();
        }
        self.inboxes.lock().remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> MeshResult<()> {
        if !self.connected() {
            return Err(MeshError::Network("transport disconnected".to_string()));
        }
        let sender = self
            .subs
            .lock()
            .get(topic)
            .map(|sub| sub.sender.clone())
            .ok_or_else(|| MeshError::Network(format!("not subscribed to {topic}")))?;
        let result = sender
            .lock()
            .await
            .broadcast(bytes.into())
            .await
            .map_err(|e| MeshError::Network(format!("failed to broadcast: {e}")));
        result
    }

    async fn send_direct(&self, peer: &PeerHandle, bytes: Vec<u8>) -> MeshResult<()> {
        if !self.connected() {
            return Err(MeshError::Network("transport disconnected".to_string()));
        }
        let endpoint_id: EndpointId = peer
            .as_str()
            .parse()
            .map_err(|_| MeshError::Network(format!("invalid peer handle {peer}")))?;

        let connection = self
            .endpoint
            .connect(EndpointAddr::from(endpoint_id), DIRECT_ALPN)
            .await
            .map_err(|e| MeshError::Network(format!("failed to connect to {peer}: {e}")))?;

        let (mut send, _recv) = connection
            .open_bi()
            .await
            .map_err(|e| MeshError::Network(format!("failed to open stream: {e}")))?;
        send.write_all(&bytes)
            .await
            .map_err(|e| MeshError::Network(format!("failed to send: {e}")))?;
        send.finish()
            .map_err(|e| MeshError::Network(format!("failed to finish stream: {e}")))?;

        // Give the receiver a chance to drain before the connection drops.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), connection.closed()).await;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
struct DirectHandler {
    inboxes: Inboxes,
}

impl DirectHandler {
    async fn handle_connection(connection: Connection, inboxes: Inboxes) -> MeshResult<()> {
        let remote_id = connection.remote_id();

        let (_send, mut recv) = connection
            .accept_bi()
            .await
            .map_err(|e| MeshError::Network(format!("failed to accept stream: {e}")))?;
        let bytes = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(|e| MeshError::Network(format!("failed to read message: {e}")))?;

        debug!(%remote_id, len = bytes.len(), "received direct message");

        let senders: Vec<mpsc::Sender<InboundMessage>> =
            inboxes.lock().values().cloned().collect();
        for sender in senders {
            let _ = sender.try_send(InboundMessage {
                from: PeerHandle(remote_id.to_string()),
                bytes: bytes.clone(),
            });
        }
        Ok(())
    }
}

impl ProtocolHandler for DirectHandler {
    fn accept(
        &self,
        conn: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let inboxes = self.inboxes.clone();
        async move {
            if let Err(e) = Self::handle_connection(conn, inboxes).await {
                warn!(error = ?e, "failed to handle direct connection");
                return Err(AcceptError::from_err(e));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_ids_are_stable_and_distinct() {
        let a1 = IrohTransport::topic_id("/org/abc/v1");
        let a2 = IrohTransport::topic_id("/org/abc/v1");
        let b = IrohTransport::topic_id("/org/def/v1");
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }
}
