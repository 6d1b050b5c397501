//! Events emitted by the knowledge engine
//!
//! Fired for both local mutations and applied remote operations, on a tokio
//! broadcast channel.

use crate::types::{FolderId, KnowledgeId, MemberId, OrgId};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    KnowledgeCreated {
        org_id: OrgId,
        knowledge_id: KnowledgeId,
    },
    KnowledgeUpdated {
        org_id: OrgId,
        knowledge_id: KnowledgeId,
    },
    KnowledgeDeleted {
        org_id: OrgId,
        knowledge_id: KnowledgeId,
    },
    KnowledgeMoved {
        org_id: OrgId,
        knowledge_id: KnowledgeId,
        folder_id: Option<FolderId>,
    },
    FolderCreated {
        org_id: OrgId,
        folder_id: FolderId,
    },
    FolderUpdated {
        org_id: OrgId,
        folder_id: FolderId,
    },
    FolderDeleted {
        org_id: OrgId,
        folder_id: FolderId,
    },
    /// An anti-entropy response was applied.
    SyncCompleted { org_id: OrgId, applied: usize },
    /// A collaborative document changed, locally or remotely.
    DocChanged { org_id: OrgId, doc_id: String },
    AwarenessChanged {
        org_id: OrgId,
        doc_id: String,
        member_id: MemberId,
    },
}
