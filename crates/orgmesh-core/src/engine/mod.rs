//! Knowledge synchronization engine
//!
//! Sits on top of the overlay: local mutations are permission-gated, written
//! to storage, logged to the activity log, and broadcast to the
//! organization. Remote operations arrive through the overlay's event
//! channel and are applied with create-idempotency and last-writer-wins
//! semantics, so replicas converge regardless of delivery order. Broadcasts
//! attempted while the transport is offline land in a durable outbox that a
//! background task drains in FIFO order after reconnection.

pub mod events;
mod remote;

pub use events::EngineEvent;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crdt::CrdtEngine;
use crate::error::{MeshError, MeshResult};
use crate::overlay::envelope::{Envelope, Payload};
use crate::overlay::OverlayNetwork;
use crate::roles::RoleResolver;
use crate::storage::Storage;
use crate::types::{
    now_ms, ActivityKind, ActivityLogEntry, Folder, FolderId, FolderUpdates, KnowledgeContent,
    KnowledgeId, KnowledgeItem, KnowledgeUpdates, MemberId, OrgId, OrgKnowledgeRecord,
    PermissionMap,
};

/// Options for sharing a knowledge item into an organization.
#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    pub folder_id: Option<FolderId>,
    pub permissions: Option<PermissionMap>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the outbox drain task retries queued broadcasts.
    pub drain_interval: Duration,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// Keyed async mutexes serializing load-modify-save sequences, so two
/// concurrent writers to the same record or folder cannot interleave their
/// reads and silently revert each other's fields.
#[derive(Default)]
struct WriteLocks {
    inner: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WriteLocks {
    fn get(&self, key: String) -> Arc<Mutex<()>> {
        self.inner.lock().entry(key).or_default().clone()
    }
}

struct OrgSyncState {
    apply_task: JoinHandle<()>,
    drain_task: JoinHandle<()>,
    /// Guards against overlapping SYNC_RESPONSE application.
    sync_in_progress: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct KnowledgeEngine {
    overlay: Arc<OverlayNetwork>,
    storage: Storage,
    crdt: Arc<CrdtEngine>,
    roles: Arc<dyn RoleResolver>,
    config: EngineConfig,
    orgs: Arc<RwLock<HashMap<OrgId, OrgSyncState>>>,
    write_locks: Arc<WriteLocks>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl KnowledgeEngine {
    pub fn new(
        overlay: Arc<OverlayNetwork>,
        storage: Storage,
        roles: Arc<dyn RoleResolver>,
    ) -> Self {
        Self::with_config(overlay, storage, roles, EngineConfig::default())
    }

    pub fn with_config(
        overlay: Arc<OverlayNetwork>,
        storage: Storage,
        roles: Arc<dyn RoleResolver>,
        config: EngineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            overlay,
            storage,
            crdt: Arc::new(CrdtEngine::new()),
            roles,
            config,
            orgs: Arc::new(RwLock::new(HashMap::new())),
            write_locks: Arc::new(WriteLocks::default()),
            event_tx,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn crdt(&self) -> &Arc<CrdtEngine> {
        &self.crdt
    }

    pub fn overlay(&self) -> &Arc<OverlayNetwork> {
        &self.overlay
    }

    fn me(&self) -> MemberId {
        self.roles.current_id()
    }

    pub(crate) fn record_lock(&self, org_id: &OrgId, knowledge_id: &KnowledgeId) -> Arc<Mutex<()>> {
        self.write_locks
            .get(format!("k/{}/{}", org_id.to_base58(), knowledge_id))
    }

    pub(crate) fn folder_lock(&self, org_id: &OrgId, folder_id: &FolderId) -> Arc<Mutex<()>> {
        self.write_locks
            .get(format!("f/{}/{}", org_id.to_base58(), folder_id))
    }

    /// Join an organization's overlay, start applying its remote
    /// operations, start the outbox drain, and ask the mesh for everything
    /// newer than our sync cursor. Idempotent for a live organization.
    pub async fn initialize(&self, org_id: &OrgId) -> MeshResult<()> {
        {
            let orgs = self.orgs.read().await;
            if orgs.contains_key(org_id) {
                debug!(org = %org_id, "engine already initialized for org");
                return Ok(());
            }
        }

        self.overlay.initialize(org_id).await?;

        let sync_in_progress = Arc::new(AtomicBool::new(false));
        let apply_task = tokio::spawn(remote::run_apply_loop(
            self.clone(),
            org_id.clone(),
            self.overlay.subscribe_events(),
            sync_in_progress.clone(),
        ));
        let drain_task = tokio::spawn(run_drain_loop(
            self.clone(),
            org_id.clone(),
            self.config.drain_interval,
        ));

        {
            let mut orgs = self.orgs.write().await;
            if orgs.contains_key(org_id) {
                apply_task.abort();
                drain_task.abort();
                return Ok(());
            }
            orgs.insert(
                org_id.clone(),
                OrgSyncState {
                    apply_task,
                    drain_task,
                    sync_in_progress,
                },
            );
        }

        // Anti-entropy: ask the mesh for everything since our watermark.
        let cursor = self.storage.load_cursor(org_id)?;
        let request = Payload::SyncRequest {
            last_sync_time: cursor.last_sync_time,
            requested_by: self.me(),
        };
        if let Err(e) = self.overlay.broadcast(org_id, request).await {
            // Not queued: a stale sync request is useless after reconnect,
            // and the next initialize sends a fresh one.
            warn!(org = %org_id, error = %e, "initial sync request failed");
        }
        info!(org = %org_id, last_sync_time = cursor.last_sync_time, "org sync started");
        Ok(())
    }

    /// Author a knowledge item locally. It stays private until shared into
    /// an organization.
    pub fn create_knowledge(
        &self,
        title: impl Into<String>,
        content: KnowledgeContent,
    ) -> MeshResult<KnowledgeItem> {
        let item = KnowledgeItem::new(title, content, self.me().as_str());
        self.storage.save_item(&item)?;
        Ok(item)
    }

    /// Share a knowledge item into an organization. Idempotent: sharing an
    /// already-shared item returns the existing record unchanged.
    pub async fn share_knowledge(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
        options: ShareOptions,
    ) -> MeshResult<OrgKnowledgeRecord> {
        let item = self
            .storage
            .load_item(knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;

        let lock = self.record_lock(org_id, knowledge_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.storage.load_record(org_id, knowledge_id)? {
            return Ok(existing);
        }

        if let Some(folder_id) = &options.folder_id {
            self.storage
                .load_folder(org_id, folder_id)?
                .ok_or(MeshError::FolderNotFound)?;
        }

        let me = self.me();
        let now = now_ms();
        let record = OrgKnowledgeRecord {
            knowledge_id: knowledge_id.clone(),
            org_id: org_id.clone(),
            folder_id: options.folder_id,
            permissions: options.permissions.unwrap_or_default(),
            created_by: me.clone(),
            last_edited_by: me.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.save_record(&record)?;
        self.log_activity(org_id, knowledge_id, ActivityKind::Create, &me, now)?;
        let _ = self.event_tx.send(EngineEvent::KnowledgeCreated {
            org_id: org_id.clone(),
            knowledge_id: knowledge_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::KnowledgeCreate {
                knowledge: item,
                org_knowledge_record: record.clone(),
                author: me,
            },
        )
        .await?;
        Ok(record)
    }

    /// Apply a partial update. The caller must be the record's creator or
    /// hold a role in `permissions.edit`; otherwise nothing is written and
    /// nothing is broadcast.
    pub async fn update_knowledge(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
        updates: KnowledgeUpdates,
    ) -> MeshResult<()> {
        if updates.is_empty() {
            return Err(MeshError::Validation("empty update".to_string()));
        }
        let lock = self.record_lock(org_id, knowledge_id);
        let _guard = lock.lock().await;

        let mut record = self
            .storage
            .load_record(org_id, knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;
        self.require_edit(org_id, &record).await?;

        let mut item = self
            .storage
            .load_item(knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;

        let me = self.me();
        let now = now_ms();
        apply_knowledge_updates(&mut item, &mut record, &updates, &me, now);
        self.storage.save_item(&item)?;
        self.storage.save_record(&record)?;
        self.log_activity(org_id, knowledge_id, ActivityKind::Edit, &me, now)?;
        let _ = self.event_tx.send(EngineEvent::KnowledgeUpdated {
            org_id: org_id.clone(),
            knowledge_id: knowledge_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::KnowledgeUpdate {
                knowledge_id: knowledge_id.clone(),
                updates,
                author: me,
                timestamp: now,
            },
        )
        .await
    }

    /// Remove organization visibility of a knowledge item. The underlying
    /// item is retained. Returns false if there was nothing to delete.
    pub async fn delete_knowledge(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
    ) -> MeshResult<bool> {
        let lock = self.record_lock(org_id, knowledge_id);
        let _guard = lock.lock().await;

        let record = match self.storage.load_record(org_id, knowledge_id)? {
            Some(record) => record,
            None => return Ok(false),
        };
        self.require_delete(org_id, &record).await?;

        let me = self.me();
        let now = now_ms();
        self.storage.delete_record(org_id, knowledge_id)?;
        self.log_activity(org_id, knowledge_id, ActivityKind::Delete, &me, now)?;
        let _ = self.event_tx.send(EngineEvent::KnowledgeDeleted {
            org_id: org_id.clone(),
            knowledge_id: knowledge_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::KnowledgeDelete {
                knowledge_id: knowledge_id.clone(),
                deleted_by: me,
                timestamp: now,
            },
        )
        .await?;
        Ok(true)
    }

    /// Move a knowledge record into a folder (or to the root with `None`).
    pub async fn move_knowledge(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
        target_folder_id: Option<FolderId>,
    ) -> MeshResult<()> {
        let lock = self.record_lock(org_id, knowledge_id);
        let _guard = lock.lock().await;

        let mut record = self
            .storage
            .load_record(org_id, knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;
        self.require_edit(org_id, &record).await?;

        if let Some(folder_id) = &target_folder_id {
            self.storage
                .load_folder(org_id, folder_id)?
                .ok_or(MeshError::FolderNotFound)?;
        }

        let me = self.me();
        let now = now_ms();
        record.folder_id = target_folder_id.clone();
        record.last_edited_by = me.clone();
        record.updated_at = now;
        self.storage.save_record(&record)?;
        self.log_activity(org_id, knowledge_id, ActivityKind::Move, &me, now)?;
        let _ = self.event_tx.send(EngineEvent::KnowledgeMoved {
            org_id: org_id.clone(),
            knowledge_id: knowledge_id.clone(),
            folder_id: target_folder_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::KnowledgeMove {
                knowledge_id: knowledge_id.clone(),
                target_folder_id,
                moved_by: me,
                timestamp: now,
            },
        )
        .await
    }

    pub async fn create_folder(
        &self,
        org_id: &OrgId,
        name: impl Into<String>,
        parent_folder_id: Option<FolderId>,
        permissions: Option<PermissionMap>,
    ) -> MeshResult<Folder> {
        if let Some(parent) = &parent_folder_id {
            self.storage
                .load_folder(org_id, parent)?
                .ok_or(MeshError::FolderNotFound)?;
        }

        let me = self.me();
        let folder = Folder::new(
            org_id.clone(),
            name,
            parent_folder_id,
            permissions.unwrap_or_default(),
            me.clone(),
        );
        self.storage.save_folder(&folder)?;
        let _ = self.event_tx.send(EngineEvent::FolderCreated {
            org_id: org_id.clone(),
            folder_id: folder.id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::FolderCreate {
                folder: folder.clone(),
                actor: me,
            },
        )
        .await?;
        Ok(folder)
    }

    /// Rename, re-permission, or reparent a folder. Reparenting under the
    /// folder's own subtree is rejected.
    pub async fn update_folder(
        &self,
        org_id: &OrgId,
        folder_id: &FolderId,
        updates: FolderUpdates,
    ) -> MeshResult<()> {
        let lock = self.folder_lock(org_id, folder_id);
        let _guard = lock.lock().await;

        let mut folder = self
            .storage
            .load_folder(org_id, folder_id)?
            .ok_or(MeshError::FolderNotFound)?;
        self.require_folder_edit(org_id, &folder).await?;

        let now = now_ms();
        self.check_reparent(org_id, folder_id, &updates)?;
        apply_folder_updates(&mut folder, &updates, now);
        self.storage.save_folder(&folder)?;
        let _ = self.event_tx.send(EngineEvent::FolderUpdated {
            org_id: org_id.clone(),
            folder_id: folder_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::FolderUpdate {
                folder_id: folder_id.clone(),
                updates,
                actor: self.me(),
                timestamp: now,
            },
        )
        .await
    }

    /// Delete a folder, reparenting its children and records to the
    /// deleted folder's parent. Returns false if the folder was absent.
    pub async fn delete_folder(&self, org_id: &OrgId, folder_id: &FolderId) -> MeshResult<bool> {
        let lock = self.folder_lock(org_id, folder_id);
        let _guard = lock.lock().await;

        let folder = match self.storage.load_folder(org_id, folder_id)? {
            Some(folder) => folder,
            None => return Ok(false),
        };
        self.require_folder_delete(org_id, &folder).await?;

        let now = now_ms();
        reparent_contents(&self.storage, org_id, &folder, now)?;
        self.storage.delete_folder(org_id, folder_id)?;
        let _ = self.event_tx.send(EngineEvent::FolderDeleted {
            org_id: org_id.clone(),
            folder_id: folder_id.clone(),
        });

        self.broadcast_or_queue(
            org_id,
            Payload::FolderDelete {
                folder_id: folder_id.clone(),
                actor: self.me(),
                timestamp: now,
            },
        )
        .await?;
        Ok(true)
    }

    pub fn list_folders(&self, org_id: &OrgId) -> MeshResult<Vec<Folder>> {
        self.storage.list_folders(org_id)
    }

    /// Every knowledge item shared into the organization, joined with its
    /// record.
    pub fn list_knowledge(
        &self,
        org_id: &OrgId,
    ) -> MeshResult<Vec<(KnowledgeItem, OrgKnowledgeRecord)>> {
        let mut out = Vec::new();
        for record in self.storage.list_records(org_id)? {
            if let Some(item) = self.storage.load_item(&record.knowledge_id)? {
                out.push((item, record));
            }
        }
        Ok(out)
    }

    /// Knowledge in one folder (`None` for the organization root), joined
    /// with its records.
    pub fn list_knowledge_in_folder(
        &self,
        org_id: &OrgId,
        folder_id: Option<&FolderId>,
    ) -> MeshResult<Vec<(KnowledgeItem, OrgKnowledgeRecord)>> {
        let mut out = Vec::new();
        for record in self.storage.list_records_in_folder(org_id, folder_id)? {
            if let Some(item) = self.storage.load_item(&record.knowledge_id)? {
                out.push((item, record));
            }
        }
        Ok(out)
    }

    pub fn get_knowledge(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
    ) -> MeshResult<(KnowledgeItem, OrgKnowledgeRecord)> {
        let record = self
            .storage
            .load_record(org_id, knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;
        let item = self
            .storage
            .load_item(knowledge_id)?
            .ok_or(MeshError::KnowledgeNotFound)?;
        Ok((item, record))
    }

    pub fn get_activity_log(
        &self,
        org_id: &OrgId,
        knowledge_id: Option<&KnowledgeId>,
        limit: usize,
    ) -> MeshResult<Vec<ActivityLogEntry>> {
        self.storage.activity_log(org_id, knowledge_id, limit)
    }

    /// Apply a CRDT update locally, then broadcast it. The local apply
    /// happens first so our own replica never lags behind what we sent.
    pub async fn broadcast_doc_update(
        &self,
        org_id: &OrgId,
        doc_id: &str,
        update: Vec<u8>,
    ) -> MeshResult<()> {
        self.crdt.apply_update(doc_id, &update)?;
        let _ = self.event_tx.send(EngineEvent::DocChanged {
            org_id: org_id.clone(),
            doc_id: doc_id.to_string(),
        });
        self.broadcast_or_queue(
            org_id,
            Payload::DocUpdate {
                doc_id: doc_id.to_string(),
                update,
            },
        )
        .await
    }

    /// Ephemeral awareness (cursors, selections). Fire and forget: never
    /// queued, never persisted.
    pub async fn broadcast_awareness(
        &self,
        org_id: &OrgId,
        doc_id: &str,
        awareness: Vec<u8>,
    ) -> MeshResult<()> {
        let payload = Payload::DocAwareness {
            doc_id: doc_id.to_string(),
            awareness,
        };
        if let Err(e) = self.overlay.broadcast(org_id, payload).await {
            debug!(org = %org_id, doc_id, error = %e, "awareness broadcast dropped");
        }
        Ok(())
    }

    /// Stop syncing one organization and leave its overlay topic. Queued
    /// outbox entries survive in storage for the next initialize.
    pub async fn shutdown_org(&self, org_id: &OrgId) -> MeshResult<bool> {
        let state = {
            let mut orgs = self.orgs.write().await;
            match orgs.remove(org_id) {
                Some(state) => state,
                None => return Ok(false),
            }
        };
        state.apply_task.abort();
        state.drain_task.abort();
        self.overlay.unsubscribe(org_id).await?;
        info!(org = %org_id, "org sync stopped");
        Ok(true)
    }

    pub async fn shutdown(&self) -> MeshResult<()> {
        let orgs: Vec<OrgId> = self.orgs.read().await.keys().cloned().collect();
        for org_id in orgs {
            self.shutdown_org(&org_id).await?;
        }
        Ok(())
    }

    pub(crate) fn log_activity(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
        kind: ActivityKind,
        actor: &MemberId,
        timestamp: i64,
    ) -> MeshResult<()> {
        self.storage.append_activity(&ActivityLogEntry {
            org_id: org_id.clone(),
            knowledge_id: knowledge_id.clone(),
            kind,
            actor: actor.clone(),
            timestamp,
        })
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn check_reparent(
        &self,
        org_id: &OrgId,
        folder_id: &FolderId,
        updates: &FolderUpdates,
    ) -> MeshResult<()> {
        if updates.move_to_root {
            return Ok(());
        }
        let Some(new_parent) = &updates.parent_folder_id else {
            return Ok(());
        };
        self.storage
            .load_folder(org_id, new_parent)?
            .ok_or(MeshError::FolderNotFound)?;
        if self.storage.is_descendant(org_id, new_parent, folder_id)? {
            return Err(MeshError::InvalidOperation(
                "cannot move a folder under its own subtree".to_string(),
            ));
        }
        Ok(())
    }

    async fn require_edit(&self, org_id: &OrgId, record: &OrgKnowledgeRecord) -> MeshResult<()> {
        let me = self.me();
        if record.created_by == me {
            return Ok(());
        }
        let role = self.roles.role_of(org_id, &me).await?;
        match role {
            Some(role) if record.permissions.can_edit(role) => Ok(()),
            _ => Err(MeshError::PermissionDenied),
        }
    }

    async fn require_delete(&self, org_id: &OrgId, record: &OrgKnowledgeRecord) -> MeshResult<()> {
        let me = self.me();
        if record.created_by == me {
            return Ok(());
        }
        let role = self.roles.role_of(org_id, &me).await?;
        match role {
            Some(role) if record.permissions.can_delete(role) => Ok(()),
            _ => Err(MeshError::PermissionDenied),
        }
    }

    async fn require_folder_edit(&self, org_id: &OrgId, folder: &Folder) -> MeshResult<()> {
        let me = self.me();
        if folder.created_by == me {
            return Ok(());
        }
        let role = self.roles.role_of(org_id, &me).await?;
        match role {
            Some(role) if folder.permissions.can_edit(role) => Ok(()),
            _ => Err(MeshError::PermissionDenied),
        }
    }

    async fn require_folder_delete(&self, org_id: &OrgId, folder: &Folder) -> MeshResult<()> {
        let me = self.me();
        if folder.created_by == me {
            return Ok(());
        }
        let role = self.roles.role_of(org_id, &me).await?;
        match role {
            Some(role) if folder.permissions.can_delete(role) => Ok(()),
            _ => Err(MeshError::PermissionDenied),
        }
    }

    /// Broadcast, or durably queue when the transport is offline or the
    /// send fails with a network error. The drain task retries queued
    /// envelopes in order.
    pub(crate) async fn broadcast_or_queue(
        &self,
        org_id: &OrgId,
        payload: Payload,
    ) -> MeshResult<()> {
        let envelope = Envelope::new(payload, org_id.clone(), self.me());
        if !self.overlay.connected() {
            let key = self.storage.enqueue_outbox(org_id, &envelope)?;
            debug!(org = %org_id, key, kind = envelope.payload.kind(), "offline, queued broadcast");
            return Ok(());
        }
        match self.overlay.broadcast_envelope(org_id, &envelope).await {
            Ok(()) => Ok(()),
            Err(MeshError::Network(e)) => {
                let key = self.storage.enqueue_outbox(org_id, &envelope)?;
                debug!(org = %org_id, key, error = %e, "broadcast failed, queued for retry");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One drain pass: re-send queued envelopes oldest first, removing each
    /// only after a successful send. Stops at the first failure so order is
    /// preserved.
    pub async fn drain_outbox(&self, org_id: &OrgId) -> MeshResult<usize> {
        if !self.overlay.connected() {
            return Ok(0);
        }
        let mut drained = 0;
        for (key, envelope) in self.storage.outbox(org_id)? {
            match self.overlay.broadcast_envelope(org_id, &envelope).await {
                Ok(()) => {
                    self.storage.remove_outbox(&key)?;
                    drained += 1;
                }
                Err(e) => {
                    debug!(org = %org_id, key, error = %e, "drain stopped, will retry");
                    break;
                }
            }
        }
        if drained > 0 {
            info!(org = %org_id, drained, "drained offline outbox");
        }
        Ok(drained)
    }
}

async fn run_drain_loop(engine: KnowledgeEngine, org_id: OrgId, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = engine.drain_outbox(&org_id).await {
            warn!(org = %org_id, error = %e, "outbox drain failed");
        }
    }
}

pub(crate) fn apply_knowledge_updates(
    item: &mut KnowledgeItem,
    record: &mut OrgKnowledgeRecord,
    updates: &KnowledgeUpdates,
    author: &MemberId,
    timestamp: i64,
) {
    if let Some(title) = &updates.title {
        item.title = title.clone();
    }
    if let Some(content) = &updates.content {
        item.content = content.clone();
    }
    if let Some(permissions) = &updates.permissions {
        record.permissions = permissions.clone();
    }
    item.updated_at = timestamp;
    record.last_edited_by = author.clone();
    record.updated_at = timestamp;
}

pub(crate) fn apply_folder_updates(folder: &mut Folder, updates: &FolderUpdates, timestamp: i64) {
    if let Some(name) = &updates.name {
        folder.name = name.clone();
    }
    if let Some(permissions) = &updates.permissions {
        folder.permissions = permissions.clone();
    }
    if updates.move_to_root {
        folder.parent_folder_id = None;
    } else if let Some(parent) = &updates.parent_folder_id {
        folder.parent_folder_id = Some(parent.clone());
    }
    folder.updated_at = timestamp;
}

/// Move a deleted folder's children and records up to its parent.
pub(crate) fn reparent_contents(
    storage: &Storage,
    org_id: &OrgId,
    folder: &Folder,
    timestamp: i64,
) -> MeshResult<()> {
    for mut child in storage.child_folders(org_id, &folder.id)? {
        child.parent_folder_id = folder.parent_folder_id.clone();
        child.updated_at = timestamp;
        storage.save_folder(&child)?;
    }
    for mut record in storage.list_records_in_folder(org_id, Some(&folder.id))? {
        record.folder_id = folder.parent_folder_id.clone();
        record.updated_at = timestamp;
        storage.save_record(&record)?;
    }
    Ok(())
}
