//! Events emitted by the overlay
//!
//! Delivered on a tokio broadcast channel. The sync engine consumes
//! `Knowledge` events; embedders typically watch the presence variants.

use crate::types::{MemberId, OrgId};

use super::envelope::Envelope;
use super::presence::OnlineMember;
use super::transport::PeerHandle;

#[derive(Debug, Clone)]
pub enum OverlayEvent {
    /// Every accepted inbound envelope, before typed dispatch. Lets
    /// embedders observe raw traffic without enumerating payload kinds.
    MessageReceived {
        org_id: OrgId,
        from: MemberId,
        envelope: Envelope,
    },
    /// A member newly appeared in the online set.
    MemberOnline { org_id: OrgId, member: OnlineMember },
    /// A member left, announced offline, or was reaped by the TTL.
    MemberOffline { org_id: OrgId, member_id: MemberId },
    /// A discovery response was observed.
    MemberDiscovered { org_id: OrgId, member: OnlineMember },
    /// A heartbeat refreshed an already-known member.
    MemberHeartbeat { org_id: OrgId, member_id: MemberId },
    /// MEMBER_JOINED / MEMBER_LEFT announcements, passed through.
    MemberEvent { org_id: OrgId, envelope: Envelope },
    /// Knowledge, sync, or CRDT envelope for the layer above. `peer` is the
    /// transport-level sender, kept so sync responses can go back to a
    /// requester who is not yet in the online set.
    Knowledge {
        org_id: OrgId,
        from: MemberId,
        peer: PeerHandle,
        envelope: Envelope,
    },
}
