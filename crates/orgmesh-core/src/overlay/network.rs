//! Overlay network handle
//!
//! The public surface of the overlay: join and leave per-organization
//! topics, broadcast and direct-send envelopes, snapshot presence, and
//! subscribe to overlay events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::types::{MemberId, OrgId};

use super::envelope::{Envelope, Payload};
use super::events::OverlayEvent;
use super::org_topic;
use super::presence::{OnlineMember, OnlineSet};
use super::session::{self, OrgSession, SessionCtx};
use super::transport::{PeerHandle, Transport};

/// Who we are on the mesh.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub member_id: MemberId,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl LocalIdentity {
    pub fn new(member_id: impl Into<MemberId>, display_name: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            display_name: display_name.into(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub heartbeat_interval: Duration,
    pub discovery_interval: Duration,
    /// Members unseen for this long are reaped on the heartbeat tick.
    pub presence_ttl: Duration,
    pub event_capacity: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        let heartbeat = Duration::from_secs(30);
        Self {
            heartbeat_interval: heartbeat,
            discovery_interval: Duration::from_secs(60),
            presence_ttl: heartbeat * 3,
            event_capacity: 256,
        }
    }
}

#[derive(Clone)]
pub struct OverlayNetwork {
    transport: Arc<dyn Transport>,
    identity: LocalIdentity,
    config: OverlayConfig,
    sessions: Arc<RwLock<HashMap<OrgId, OrgSession>>>,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl OverlayNetwork {
    pub fn new(transport: Arc<dyn Transport>, identity: LocalIdentity) -> Self {
        Self::with_config(transport, identity, OverlayConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        identity: LocalIdentity,
        config: OverlayConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            transport,
            identity,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn member_id(&self) -> &MemberId {
        &self.identity.member_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent> {
        self.event_tx.subscribe()
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// Join an organization's topic and start its presence tasks.
    /// Re-initializing a live organization is a no-op.
    pub async fn initialize(&self, org_id: &OrgId) -> MeshResult<()> {
        // Held across the subscribe await: a racing initialize must wait
        // here and then see the entry, instead of double-subscribing and
        // tearing down the winner's mailbox.
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(org_id) {
            debug!(org = %org_id, "session already initialized");
            return Ok(());
        }

        let topic = org_topic(org_id);
        let inbound = self.transport.subscribe(&topic).await?;
        let pubsub = self.transport.supports_pubsub();

        let ctx = SessionCtx {
            org_id: org_id.clone(),
            topic: topic.clone(),
            identity: self.identity.clone(),
            transport: self.transport.clone(),
            online: Arc::new(SyncRwLock::new(OnlineSet::new())),
            event_tx: self.event_tx.clone(),
            config: self.config.clone(),
            pubsub,
        };

        info!(org = %org_id, %topic, pubsub, "joining organization overlay");
        sessions.insert(org_id.clone(), session::spawn(ctx, inbound));
        Ok(())
    }

    /// Wrap a payload in a fresh envelope and broadcast it to the
    /// organization.
    pub async fn broadcast(&self, org_id: &OrgId, payload: Payload) -> MeshResult<()> {
        let envelope = Envelope::new(payload, org_id.clone(), self.identity.member_id.clone());
        self.broadcast_envelope(org_id, &envelope).await
    }

    /// Broadcast a pre-built envelope. Used by the outbox drain, which must
    /// preserve the original payload timestamps.
    pub async fn broadcast_envelope(&self, org_id: &OrgId, envelope: &Envelope) -> MeshResult<()> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(org_id)
            .ok_or(MeshError::SessionNotInitialized)?;
        session::broadcast_envelope(
            &self.transport,
            &session.topic,
            session.pubsub,
            &session.online,
            envelope,
        )
        .await
    }

    /// Unicast a payload to one online member, using the peer handle the
    /// presence layer learned for them.
    pub async fn send_direct(
        &self,
        org_id: &OrgId,
        member_id: &MemberId,
        payload: Payload,
    ) -> MeshResult<()> {
        let peer = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(org_id)
                .ok_or(MeshError::SessionNotInitialized)?;
            let online = session.online.read();
            online
                .get(member_id)
                .and_then(|m| m.peer_handle.clone())
                .ok_or_else(|| MeshError::Network(format!("no route to member {member_id}")))?
        };
        self.send_direct_to_peer(org_id, &peer, payload).await
    }

    /// Unicast straight to a transport peer handle. Needed when responding
    /// to a sender who is not yet in the online set.
    pub async fn send_direct_to_peer(
        &self,
        org_id: &OrgId,
        peer: &PeerHandle,
        payload: Payload,
    ) -> MeshResult<()> {
        {
            let sessions = self.sessions.read().await;
            if !sessions.contains_key(org_id) {
                return Err(MeshError::SessionNotInitialized);
            }
        }
        let envelope = Envelope::new(payload, org_id.clone(), self.identity.member_id.clone());
        self.transport.send_direct(peer, envelope.encode()?).await
    }

    pub async fn online_members(&self, org_id: &OrgId) -> MeshResult<Vec<OnlineMember>> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(org_id)
            .ok_or(MeshError::SessionNotInitialized)?;
        let members = session.online.read().snapshot();
        Ok(members)
    }

    /// Leave an organization: announce offline best-effort, stop the
    /// session tasks, drop the topic. Returns false if there was no live
    /// session (repeated unsubscribe is a no-op).
    pub async fn unsubscribe(&self, org_id: &OrgId) -> MeshResult<bool> {
        let session = {
            let mut sessions = self.sessions.write().await;
            match sessions.remove(org_id) {
                Some(session) => session,
                None => return Ok(false),
            }
        };

        let offline = Envelope::new(
            Payload::MemberOffline {
                member_id: self.identity.member_id.clone(),
            },
            org_id.clone(),
            self.identity.member_id.clone(),
        );
        if let Err(e) = session::broadcast_envelope(
            &self.transport,
            &session.topic,
            session.pubsub,
            &session.online,
            &offline,
        )
        .await
        {
            debug!(org = %org_id, error = %e, "offline announcement failed");
        }

        session.abort();
        if let Err(e) = self.transport.unsubscribe(&session.topic).await {
            warn!(org = %org_id, error = %e, "transport unsubscribe failed");
        }
        info!(org = %org_id, "left organization overlay");
        Ok(true)
    }

    pub async fn shutdown(&self) -> MeshResult<()> {
        let orgs: Vec<OrgId> = self.sessions.read().await.keys().cloned().collect();
        for org_id in orgs {
            self.unsubscribe(&org_id).await?;
        }
        Ok(())
    }
}
