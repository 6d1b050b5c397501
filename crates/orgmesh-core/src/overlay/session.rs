//! Per-organization session actor
//!
//! Owns the online set and three background tasks: inbound dispatch,
//! heartbeat (which also reaps stale presences), and discovery. Inbound
//! failures never propagate; bad bytes are logged and dropped.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::MeshResult;
use crate::types::{MemberId, OrgId};

use super::envelope::{Envelope, Payload};
use super::events::OverlayEvent;
use super::network::{LocalIdentity, OverlayConfig};
use super::presence::OnlineSet;
use super::transport::{InboundMessage, PeerHandle, Transport};

pub(super) struct SessionCtx {
    pub org_id: OrgId,
    pub topic: String,
    pub identity: LocalIdentity,
    pub transport: Arc<dyn Transport>,
    pub online: Arc<RwLock<OnlineSet>>,
    pub event_tx: broadcast::Sender<OverlayEvent>,
    pub config: OverlayConfig,
    pub pubsub: bool,
}

pub(super) struct OrgSession {
    pub topic: String,
    pub online: Arc<RwLock<OnlineSet>>,
    pub pubsub: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl OrgSession {
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub(super) fn spawn(ctx: SessionCtx, inbound: mpsc::Receiver<InboundMessage>) -> OrgSession {
    let topic = ctx.topic.clone();
    let online = ctx.online.clone();
    let pubsub = ctx.pubsub;
    let ctx = Arc::new(ctx);

    let tasks = vec![
        tokio::spawn(run_dispatch(ctx.clone(), inbound)),
        tokio::spawn(run_heartbeat(ctx.clone())),
        tokio::spawn(run_discovery(ctx)),
    ];

    OrgSession {
        topic,
        online,
        pubsub,
        tasks,
    }
}

/// Publish once in pubsub mode; otherwise one direct copy per online member
/// with a known route. A single recipient's failure never fails the call.
pub(super) async fn broadcast_envelope(
    transport: &Arc<dyn Transport>,
    topic: &str,
    pubsub: bool,
    online: &Arc<RwLock<OnlineSet>>,
    envelope: &Envelope,
) -> MeshResult<()> {
    let bytes = envelope.encode()?;
    if pubsub {
        transport.publish(topic, bytes).await
    } else {
        let routes: Vec<(MemberId, PeerHandle)> = online
            .read()
            .snapshot()
            .into_iter()
            .filter_map(|m| m.peer_handle.map(|h| (m.member_id, h)))
            .collect();
        for (member, peer) in routes {
            if let Err(e) = transport.send_direct(&peer, bytes.clone()).await {
                warn!(%member, %peer, error = %e, "direct fanout send failed, continuing");
            }
        }
        Ok(())
    }
}

async fn run_dispatch(ctx: Arc<SessionCtx>, mut inbound: mpsc::Receiver<InboundMessage>) {
    while let Some(msg) = inbound.recv().await {
        let envelope = match Envelope::decode(&msg.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(org = %ctx.org_id, error = %e, "dropping undecodable message");
                continue;
            }
        };
        if envelope.org_id != ctx.org_id {
            debug!(org = %ctx.org_id, from_org = %envelope.org_id, "dropping foreign-org envelope");
            continue;
        }
        // Gossip echoes our own broadcasts back.
        if envelope.sender_id == ctx.identity.member_id {
            continue;
        }
        handle_envelope(&ctx, msg.from, envelope).await;
    }
}

async fn handle_envelope(ctx: &SessionCtx, from: PeerHandle, envelope: Envelope) {
    // Without pubsub every message arrives over a direct connection, so the
    // transport-level sender is a usable return route. Under gossip the
    // deliverer may be a relay, so only explicit peer handles count there.
    let direct_route = if ctx.pubsub { None } else { Some(from.clone()) };

    let _ = ctx.event_tx.send(OverlayEvent::MessageReceived {
        org_id: ctx.org_id.clone(),
        from: envelope.sender_id.clone(),
        envelope: envelope.clone(),
    });

    match envelope.payload.clone() {
        Payload::DiscoveryRequest { requester_id } => {
            // In direct mode the request is also how we learn the route for
            // the answer.
            if let Some(route) = direct_route.clone() {
                note_presence(ctx, requester_id.clone(), None, None, Some(route), false);
            }
            let response = Envelope::new(
                Payload::DiscoveryResponse {
                    responder_id: ctx.identity.member_id.clone(),
                    requester_id,
                    display_name: ctx.identity.display_name.clone(),
                    avatar: ctx.identity.avatar.clone(),
                    peer_handle: Some(ctx.transport.local_handle()),
                },
                ctx.org_id.clone(),
                ctx.identity.member_id.clone(),
            );
            if let Err(e) =
                broadcast_envelope(&ctx.transport, &ctx.topic, ctx.pubsub, &ctx.online, &response)
                    .await
            {
                warn!(org = %ctx.org_id, error = %e, "discovery response failed");
            }
        }
        Payload::DiscoveryResponse {
            responder_id,
            display_name,
            avatar,
            peer_handle,
            ..
        } => {
            note_presence(
                ctx,
                responder_id,
                Some(display_name),
                avatar,
                peer_handle.or(direct_route),
                true,
            );
        }
        Payload::Heartbeat {
            member_id,
            display_name,
            avatar,
            ..
        } => {
            note_presence(ctx, member_id, Some(display_name), avatar, direct_route, false);
        }
        Payload::MemberOnline {
            member_id,
            display_name,
            avatar,
            peer_handle,
        } => {
            note_presence(
                ctx,
                member_id,
                display_name,
                avatar,
                peer_handle.or(direct_route),
                false,
            );
        }
        Payload::MemberOffline { member_id } => {
            let removed = ctx.online.write().remove(&member_id).is_some();
            if removed {
                let _ = ctx.event_tx.send(OverlayEvent::MemberOffline {
                    org_id: ctx.org_id.clone(),
                    member_id,
                });
            }
        }
        Payload::MemberJoined { .. } | Payload::MemberLeft { .. } => {
            let _ = ctx.event_tx.send(OverlayEvent::MemberEvent {
                org_id: ctx.org_id.clone(),
                envelope,
            });
        }
        _ => {
            let _ = ctx.event_tx.send(OverlayEvent::Knowledge {
                org_id: ctx.org_id.clone(),
                from: envelope.sender_id.clone(),
                peer: from,
                envelope,
            });
        }
    }
}

fn note_presence(
    ctx: &SessionCtx,
    member_id: MemberId,
    display_name: Option<String>,
    avatar: Option<String>,
    peer_handle: Option<PeerHandle>,
    discovered: bool,
) {
    let (newly_online, member) = {
        let mut online = ctx.online.write();
        let newly = online.upsert(member_id.clone(), display_name, avatar, peer_handle);
        (newly, online.get(&member_id).cloned())
    };
    let Some(member) = member else { return };

    if discovered {
        let _ = ctx.event_tx.send(OverlayEvent::MemberDiscovered {
            org_id: ctx.org_id.clone(),
            member: member.clone(),
        });
    }
    if newly_online {
        let _ = ctx.event_tx.send(OverlayEvent::MemberOnline {
            org_id: ctx.org_id.clone(),
            member,
        });
    } else {
        let _ = ctx.event_tx.send(OverlayEvent::MemberHeartbeat {
            org_id: ctx.org_id.clone(),
            member_id,
        });
    }
}

async fn run_heartbeat(ctx: Arc<SessionCtx>) {
    let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
    let ttl_ms = ctx.config.presence_ttl.as_millis() as i64;
    loop {
        interval.tick().await;
        let envelope = Envelope::new(
            Payload::Heartbeat {
                member_id: ctx.identity.member_id.clone(),
                display_name: ctx.identity.display_name.clone(),
                avatar: ctx.identity.avatar.clone(),
                status: "online".to_string(),
            },
            ctx.org_id.clone(),
            ctx.identity.member_id.clone(),
        );
        if let Err(e) =
            broadcast_envelope(&ctx.transport, &ctx.topic, ctx.pubsub, &ctx.online, &envelope).await
        {
            debug!(org = %ctx.org_id, error = %e, "heartbeat broadcast failed");
        }

        let reaped = ctx.online.write().prune_older_than(ttl_ms);
        for member_id in reaped {
            debug!(org = %ctx.org_id, %member_id, "presence expired");
            let _ = ctx.event_tx.send(OverlayEvent::MemberOffline {
                org_id: ctx.org_id.clone(),
                member_id,
            });
        }
    }
}

async fn run_discovery(ctx: Arc<SessionCtx>) {
    let mut interval = tokio::time::interval(ctx.config.discovery_interval);
    loop {
        interval.tick().await;
        let envelope = Envelope::new(
            Payload::DiscoveryRequest {
                requester_id: ctx.identity.member_id.clone(),
            },
            ctx.org_id.clone(),
            ctx.identity.member_id.clone(),
        );
        if let Err(e) =
            broadcast_envelope(&ctx.transport, &ctx.topic, ctx.pubsub, &ctx.online, &envelope).await
        {
            debug!(org = %ctx.org_id, error = %e, "discovery broadcast failed");
        }
    }
}
