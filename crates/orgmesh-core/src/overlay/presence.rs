//! Per-organization online set
//!
//! Fed by heartbeats, discovery responses and explicit online/offline
//! announcements. The heartbeat tick also reaps members whose last_seen is
//! older than the presence TTL.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{now_ms, MemberId};

use super::transport::PeerHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMember {
    pub member_id: MemberId,
    pub display_name: String,
    pub avatar: Option<String>,
    /// Transport address for direct sends, when the peer announced one.
    pub peer_handle: Option<PeerHandle>,
    pub last_seen: i64,
}

/// Presence state for one organization session.
#[derive(Debug, Default)]
pub struct OnlineSet {
    members: HashMap<MemberId, OnlineMember>,
}

impl OnlineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a member. Returns true if the member was not online
    /// before (callers emit MemberOnline for new arrivals, MemberHeartbeat
    /// for refreshes). A refresh keeps a previously learned peer handle if
    /// the new observation carries none.
    pub fn upsert(
        &mut self,
        member_id: MemberId,
        display_name: Option<String>,
        avatar: Option<String>,
        peer_handle: Option<PeerHandle>,
    ) -> bool {
        let now = now_ms();
        match self.members.get_mut(&member_id) {
            Some(existing) => {
                if let Some(name) = display_name {
                    existing.display_name = name;
                }
                if avatar.is_some() {
                    existing.avatar = avatar;
                }
                if peer_handle.is_some() {
                    existing.peer_handle = peer_handle;
                }
                existing.last_seen = now;
                false
            }
            None => {
                self.members.insert(
                    member_id.clone(),
                    OnlineMember {
                        member_id,
                        display_name: display_name.unwrap_or_default(),
                        avatar,
                        peer_handle,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn remove(&mut self, member_id: &MemberId) -> Option<OnlineMember> {
        self.members.remove(member_id)
    }

    pub fn get(&self, member_id: &MemberId) -> Option<&OnlineMember> {
        self.members.get(member_id)
    }

    pub fn snapshot(&self) -> Vec<OnlineMember> {
        let mut members: Vec<_> = self.members.values().cloned().collect();
        members.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drop members whose last_seen is older than `ttl_ms`, returning who
    /// was reaped.
    pub fn prune_older_than(&mut self, ttl_ms: i64) -> Vec<MemberId> {
        let cutoff = now_ms() - ttl_ms;
        let stale: Vec<MemberId> = self
            .members
            .values()
            .filter(|m| m.last_seen < cutoff)
            .map(|m| m.member_id.clone())
            .collect();
        for id in &stale {
            self.members.remove(id);
        }
        stale
    }
}
