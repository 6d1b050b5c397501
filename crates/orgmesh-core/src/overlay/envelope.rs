//! Wire envelope
//!
//! Every overlay message is a JSON envelope: `{"type", "payload", "orgId",
//! "senderId", "timestamp"}`. Type tags are SCREAMING_SNAKE, payload fields
//! camelCase. Decode failures are validation errors that the dispatch loop
//! drops; they never reach callers.

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::types::{
    now_ms, Folder, FolderId, FolderUpdates, KnowledgeId, KnowledgeItem, KnowledgeUpdates,
    MemberId, OrgId, OrgKnowledgeRecord, Role,
};

use super::transport::PeerHandle;

/// One `{item, record}` pair carried in a SYNC_RESPONSE.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncEntry {
    pub item: KnowledgeItem,
    pub record: OrgKnowledgeRecord,
}

/// Typed message body. The tag/content pair serializes as the envelope's
/// `type` and `payload` fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Payload {
    DiscoveryRequest {
        requester_id: MemberId,
    },
    DiscoveryResponse {
        responder_id: MemberId,
        requester_id: MemberId,
        display_name: String,
        avatar: Option<String>,
        peer_handle: Option<PeerHandle>,
    },
    Heartbeat {
        member_id: MemberId,
        display_name: String,
        avatar: Option<String>,
        status: String,
    },
    MemberOnline {
        member_id: MemberId,
        display_name: Option<String>,
        avatar: Option<String>,
        peer_handle: Option<PeerHandle>,
    },
    MemberOffline {
        member_id: MemberId,
    },
    MemberJoined {
        member_id: MemberId,
        role: Option<Role>,
    },
    MemberLeft {
        member_id: MemberId,
        role: Option<Role>,
    },
    KnowledgeCreate {
        knowledge: KnowledgeItem,
        org_knowledge_record: OrgKnowledgeRecord,
        author: MemberId,
    },
    KnowledgeUpdate {
        knowledge_id: KnowledgeId,
        updates: KnowledgeUpdates,
        author: MemberId,
        timestamp: i64,
    },
    KnowledgeDelete {
        knowledge_id: KnowledgeId,
        deleted_by: MemberId,
        timestamp: i64,
    },
    KnowledgeMove {
        knowledge_id: KnowledgeId,
        target_folder_id: Option<FolderId>,
        moved_by: MemberId,
        timestamp: i64,
    },
    FolderCreate {
        folder: Folder,
        actor: MemberId,
    },
    FolderUpdate {
        folder_id: FolderId,
        updates: FolderUpdates,
        actor: MemberId,
        timestamp: i64,
    },
    FolderDelete {
        folder_id: FolderId,
        actor: MemberId,
        timestamp: i64,
    },
    SyncRequest {
        last_sync_time: i64,
        requested_by: MemberId,
    },
    SyncResponse {
        knowledge: Vec<SyncEntry>,
    },
    #[serde(rename = "YJS_UPDATE")]
    DocUpdate {
        doc_id: String,
        update: Vec<u8>,
    },
    #[serde(rename = "YJS_AWARENESS")]
    DocAwareness {
        doc_id: String,
        awareness: Vec<u8>,
    },
}

impl Payload {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::DiscoveryRequest { .. } => "DISCOVERY_REQUEST",
            Payload::DiscoveryResponse { .. } => "DISCOVERY_RESPONSE",
            Payload::Heartbeat { .. } => "HEARTBEAT",
            Payload::MemberOnline { .. } => "MEMBER_ONLINE",
            Payload::MemberOffline { .. } => "MEMBER_OFFLINE",
            Payload::MemberJoined { .. } => "MEMBER_JOINED",
            Payload::MemberLeft { .. } => "MEMBER_LEFT",
            Payload::KnowledgeCreate { .. } => "KNOWLEDGE_CREATE",
            Payload::KnowledgeUpdate { .. } => "KNOWLEDGE_UPDATE",
            Payload::KnowledgeDelete { .. } => "KNOWLEDGE_DELETE",
            Payload::KnowledgeMove { .. } => "KNOWLEDGE_MOVE",
            Payload::FolderCreate { .. } => "FOLDER_CREATE",
            Payload::FolderUpdate { .. } => "FOLDER_UPDATE",
            Payload::FolderDelete { .. } => "FOLDER_DELETE",
            Payload::SyncRequest { .. } => "SYNC_REQUEST",
            Payload::SyncResponse { .. } => "SYNC_RESPONSE",
            Payload::DocUpdate { .. } => "YJS_UPDATE",
            Payload::DocAwareness { .. } => "YJS_AWARENESS",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    pub org_id: OrgId,
    pub sender_id: MemberId,
    pub timestamp: i64,
}

impl Envelope {
    /// Wrap a payload, stamping the current wall-clock time.
    pub fn new(payload: Payload, org_id: OrgId, sender_id: MemberId) -> Self {
        Self {
            payload,
            org_id,
            sender_id,
            timestamp: now_ms(),
        }
    }

    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MeshError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MeshError::Validation(format!("malformed envelope: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat_envelope() -> Envelope {
        Envelope::new(
            Payload::Heartbeat {
                member_id: MemberId::from("did:example:alice"),
                display_name: "Alice".to_string(),
                avatar: None,
                status: "online".to_string(),
            },
            OrgId::new(),
            MemberId::from("did:example:alice"),
        )
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = heartbeat_envelope();
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_wire_shape() {
        let env = heartbeat_envelope();
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "HEARTBEAT");
        assert_eq!(value["payload"]["displayName"], "Alice");
        assert_eq!(value["payload"]["status"], "online");
        assert!(value["orgId"].is_string());
        assert!(value["senderId"].is_string());
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_doc_update_tag_names() {
        let env = Envelope::new(
            Payload::DocUpdate {
                doc_id: "doc-1".to_string(),
                update: vec![1, 2, 3],
            },
            OrgId::new(),
            MemberId::from("did:example:alice"),
        );
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "YJS_UPDATE");

        let env = Envelope::new(
            Payload::DocAwareness {
                doc_id: "doc-1".to_string(),
                awareness: vec![4],
            },
            OrgId::new(),
            MemberId::from("did:example:alice"),
        );
        let value: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "YJS_AWARENESS");
    }

    #[test]
    fn test_malformed_bytes_fail_decode() {
        assert!(Envelope::decode(b"not json at all").is_err());
        assert!(Envelope::decode(b"").is_err());
        assert!(Envelope::decode(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_unknown_type_tag_fails_decode() {
        let raw = serde_json::json!({
            "type": "TOTALLY_UNKNOWN",
            "payload": {},
            "orgId": OrgId::new().to_base58(),
            "senderId": "did:example:alice",
            "timestamp": 1i64,
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        assert!(Envelope::decode(&bytes).is_err());
    }

    #[test]
    fn test_missing_payload_field_fails_decode() {
        // KNOWLEDGE_UPDATE without its author.
        let raw = serde_json::json!({
            "type": "KNOWLEDGE_UPDATE",
            "payload": {
                "knowledgeId": KnowledgeId::new(),
                "updates": {},
                "timestamp": 5i64,
            },
            "orgId": OrgId::new().to_base58(),
            "senderId": "did:example:alice",
            "timestamp": 1i64,
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        assert!(Envelope::decode(&bytes).is_err());
    }
}
