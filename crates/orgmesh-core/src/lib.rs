//! # orgmesh-core
//!
//! Peer-to-peer knowledge synchronization for organizations.
//!
//! Two layers, no central server:
//!
//! - **Overlay**: one gossip topic per organization carrying JSON envelopes
//!   over iroh. Tracks presence through heartbeat and discovery rounds and
//!   falls back to direct per-member fanout when the transport has no
//!   pubsub.
//! - **Engine**: permission-gated knowledge and folder CRUD on redb, with
//!   idempotent creates, last-writer-wins updates, an append-only activity
//!   log, anti-entropy catch-up for joining members, a durable offline
//!   outbox, and automerge-backed collaborative documents.
//!
//! ```no_run
//! use std::sync::Arc;
//! use orgmesh_core::engine::KnowledgeEngine;
//! use orgmesh_core::overlay::{IrohTransport, LocalIdentity, OverlayNetwork};
//! use orgmesh_core::roles::StaticRoleResolver;
//! use orgmesh_core::storage::Storage;
//! use orgmesh_core::types::{KnowledgeContent, OrgId};
//!
//! # async fn run() -> orgmesh_core::error::MeshResult<()> {
//! let transport = Arc::new(IrohTransport::new().await?);
//! let overlay = Arc::new(OverlayNetwork::new(
//!     transport,
//!     LocalIdentity::new("did:example:alice", "Alice"),
//! ));
//! let storage = Storage::new("./data/mesh.redb")?;
//! let roles = Arc::new(StaticRoleResolver::new("did:example:alice"));
//! let engine = KnowledgeEngine::new(overlay, storage, roles);
//!
//! let org = OrgId::new();
//! engine.initialize(&org).await?;
//! let item = engine.create_knowledge(
//!     "Release checklist",
//!     KnowledgeContent::Inline { data: "1. tag\n2. ship".into() },
//! )?;
//! engine.share_knowledge(&org, &item.id, Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod crdt;
pub mod engine;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod roles;
pub mod storage;
pub mod types;

pub use crdt::CrdtEngine;
pub use engine::{EngineEvent, KnowledgeEngine, ShareOptions};
pub use error::{MeshError, MeshResult};
pub use overlay::{
    Envelope, LocalIdentity, OverlayConfig, OverlayEvent, OverlayNetwork, Payload, PeerHandle,
    Transport,
};
pub use roles::{RoleResolver, StaticRoleResolver};
pub use storage::Storage;
pub use types::{
    Folder, FolderId, FolderUpdates, KnowledgeContent, KnowledgeId, KnowledgeItem,
    KnowledgeUpdates, MemberId, OrgId, OrgKnowledgeRecord, PermissionMap, Role,
};
