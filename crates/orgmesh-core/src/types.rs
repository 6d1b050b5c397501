//! Core types for Orgmesh

use rand::RngCore;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Current epoch-millisecond timestamp
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unique identifier for an organization (maps to one gossip topic)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrgId(pub [u8; 32]);

impl OrgId {
    /// Create a new random OrgId
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create an OrgId from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the OrgId
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to base58 string for display/storage keys
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse from base58 string
    pub fn from_base58(s: &str) -> Result<Self, bs58::decode::Error> {
        let bytes = bs58::decode(s).into_vec()?;
        if bytes.len() != 32 {
            return Err(bs58::decode::Error::BufferTooSmall);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "org_{}", bs58::encode(&self.0[..8]).into_string())
    }
}

// On the wire and in storage the id travels as its base58 form, which keeps
// envelope JSON readable and makes the id usable as a table key prefix.
impl Serialize for OrgId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for OrgId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OrgId::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier for a knowledge item
///
/// Uses ULID for time-ordered unique identifiers that sort lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeId(pub Ulid);

impl KnowledgeId {
    /// Create a new KnowledgeId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kn_{}", self.0)
    }
}

/// Unique identifier for a folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub Ulid);

impl FolderId {
    /// Create a new FolderId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for FolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fld_{}", self.0)
    }
}

/// Identifier for an organization member
///
/// Opaque string issued by the identity provider (typically a DID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Role of a member within an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Admin => write!(f, "admin"),
            Role::Member => write!(f, "member"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Role lists gating view/edit/delete on a record or folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionMap {
    pub view: Vec<Role>,
    pub edit: Vec<Role>,
    pub delete: Vec<Role>,
}

impl Default for PermissionMap {
    fn default() -> Self {
        Self {
            view: vec![Role::Owner, Role::Admin, Role::Member, Role::Viewer],
            edit: vec![Role::Owner, Role::Admin, Role::Member],
            delete: vec![Role::Owner, Role::Admin],
        }
    }
}

impl PermissionMap {
    pub fn can_view(&self, role: Role) -> bool {
        self.view.contains(&role)
    }

    pub fn can_edit(&self, role: Role) -> bool {
        self.edit.contains(&role)
    }

    pub fn can_delete(&self, role: Role) -> bool {
        self.delete.contains(&role)
    }
}

/// Content of a knowledge item: either inline data or a reference to a
/// collaborative CRDT document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum KnowledgeContent {
    /// Opaque inline body
    Inline { data: String },
    /// Reference to a CRDT document managed by the document engine
    Doc { doc_id: String },
}

/// A knowledge item: the underlying document/note, independent of any
/// organization it may be shared into.
///
/// Items are never hard-deleted by the sync core; removing an organization's
/// record only removes visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub title: String,
    pub content: KnowledgeContent,
    pub created_at: i64,
    pub updated_at: i64,
    /// Device that originally authored the item
    pub origin_device: String,
}

impl KnowledgeItem {
    pub fn new(
        title: impl Into<String>,
        content: KnowledgeContent,
        origin_device: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: KnowledgeId::new(),
            title: title.into(),
            content,
            created_at: now,
            updated_at: now,
            origin_device: origin_device.into(),
        }
    }
}

/// Join entity scoping a [`KnowledgeItem`] to an organization.
///
/// At most one record exists per (organization, knowledge item) pair.
/// Removing the record is a soft delete of organization visibility only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgKnowledgeRecord {
    pub knowledge_id: KnowledgeId,
    pub org_id: OrgId,
    pub folder_id: Option<FolderId>,
    pub permissions: PermissionMap,
    pub created_by: MemberId,
    pub last_edited_by: MemberId,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Folder within an organization's knowledge tree.
///
/// The parent chain is acyclic and terminates at a root
/// (`parent_folder_id = None`); reparenting under a descendant is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub org_id: OrgId,
    pub name: String,
    pub parent_folder_id: Option<FolderId>,
    pub permissions: PermissionMap,
    pub created_by: MemberId,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Folder {
    pub fn new(
        org_id: OrgId,
        name: impl Into<String>,
        parent_folder_id: Option<FolderId>,
        permissions: PermissionMap,
        created_by: MemberId,
    ) -> Self {
        let now = now_ms();
        Self {
            id: FolderId::new(),
            org_id,
            name: name.into(),
            parent_folder_id,
            permissions,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of activity recorded in the append-only log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Create,
    Edit,
    Delete,
    Move,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Create => write!(f, "create"),
            ActivityKind::Edit => write!(f, "edit"),
            ActivityKind::Delete => write!(f, "delete"),
            ActivityKind::Move => write!(f, "move"),
        }
    }
}

/// One entry of the append-only activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub org_id: OrgId,
    pub knowledge_id: KnowledgeId,
    pub kind: ActivityKind,
    pub actor: MemberId,
    pub timestamp: i64,
}

/// Partial update applied to a knowledge item and its organization record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<KnowledgeContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionMap>,
}

impl KnowledgeUpdates {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.permissions.is_none()
    }
}

/// Partial update applied to a folder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionMap>,
    /// Reparent under this folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<FolderId>,
    /// Move to the root (takes precedence over `parent_folder_id`)
    #[serde(default)]
    pub move_to_root: bool,
}
