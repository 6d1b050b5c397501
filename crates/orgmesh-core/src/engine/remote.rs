//! Remote operation handlers
//!
//! Consumes the overlay's Knowledge events for one organization and applies
//! them to local state. Handlers never raise: anything malformed, stale, or
//! aimed at a missing target is logged and dropped. Creates are idempotent
//! and updates follow last-writer-wins on the payload timestamp, which is
//! what makes replicas converge regardless of delivery order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::MeshResult;
use crate::overlay::envelope::{Payload, SyncEntry};
use crate::overlay::transport::PeerHandle;
use crate::overlay::OverlayEvent;
use crate::types::{
    ActivityKind, Folder, FolderId, FolderUpdates, KnowledgeId, KnowledgeItem, KnowledgeUpdates,
    MemberId, OrgId, OrgKnowledgeRecord,
};

use super::{
    apply_folder_updates, apply_knowledge_updates, reparent_contents, EngineEvent, KnowledgeEngine,
};

pub(super) async fn run_apply_loop(
    engine: KnowledgeEngine,
    org_id: OrgId,
    mut events: broadcast::Receiver<OverlayEvent>,
    sync_in_progress: Arc<AtomicBool>,
) {
    loop {
        match events.recv().await {
            Ok(OverlayEvent::Knowledge {
                org_id: event_org,
                from,
                peer,
                envelope,
            }) if event_org == org_id => {
                if let Err(e) =
                    apply_remote(&engine, &org_id, &from, &peer, envelope.payload, &sync_in_progress)
                        .await
                {
                    // Inbound failures stay here.
                    warn!(org = %org_id, %from, error = %e, "failed to apply remote operation");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(org = %org_id, skipped, "apply loop lagged behind overlay events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn apply_remote(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    from: &MemberId,
    peer: &PeerHandle,
    payload: Payload,
    sync_in_progress: &AtomicBool,
) -> MeshResult<()> {
    match payload {
        Payload::KnowledgeCreate {
            knowledge,
            org_knowledge_record,
            author,
        } => apply_create(engine, org_id, knowledge, org_knowledge_record, author).await,
        Payload::KnowledgeUpdate {
            knowledge_id,
            updates,
            author,
            timestamp,
        } => apply_update(engine, org_id, &knowledge_id, updates, author, timestamp).await,
        Payload::KnowledgeDelete {
            knowledge_id,
            deleted_by,
            timestamp,
        } => apply_delete(engine, org_id, &knowledge_id, deleted_by, timestamp).await,
        Payload::KnowledgeMove {
            knowledge_id,
            target_folder_id,
            moved_by,
            timestamp,
        } => apply_move(engine, org_id, &knowledge_id, target_folder_id, moved_by, timestamp).await,
        Payload::FolderCreate { folder, .. } => apply_folder_create(engine, org_id, folder).await,
        Payload::FolderUpdate {
            folder_id,
            updates,
            timestamp,
            ..
        } => apply_folder_update(engine, org_id, &folder_id, updates, timestamp).await,
        Payload::FolderDelete { folder_id, .. } => {
            apply_folder_delete(engine, org_id, &folder_id).await
        }
        Payload::SyncRequest {
            last_sync_time,
            requested_by,
        } => answer_sync_request(engine, org_id, peer, last_sync_time, requested_by).await,
        Payload::SyncResponse { knowledge } => {
            apply_sync_response(engine, org_id, knowledge, sync_in_progress).await
        }
        Payload::DocUpdate { doc_id, update } => {
            engine.crdt().apply_update(&doc_id, &update)?;
            engine.emit(EngineEvent::DocChanged {
                org_id: org_id.clone(),
                doc_id,
            });
            Ok(())
        }
        Payload::DocAwareness { doc_id, awareness } => {
            engine.crdt().apply_awareness(&doc_id, from, awareness);
            engine.emit(EngineEvent::AwarenessChanged {
                org_id: org_id.clone(),
                doc_id,
                member_id: from.clone(),
            });
            Ok(())
        }
        // Presence payloads are handled inside the overlay session.
        other => {
            debug!(org = %org_id, kind = other.kind(), "ignoring non-knowledge payload");
            Ok(())
        }
    }
}

/// Idempotent: an existing record for the same knowledge id wins and the
/// duplicate is dropped.
async fn apply_create(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    item: KnowledgeItem,
    record: OrgKnowledgeRecord,
    author: MemberId,
) -> MeshResult<()> {
    if record.org_id != *org_id || record.knowledge_id != item.id {
        debug!(org = %org_id, "dropping inconsistent create payload");
        return Ok(());
    }
    let lock = engine.record_lock(org_id, &item.id);
    let _guard = lock.lock().await;
    if engine.storage().load_record(org_id, &item.id)?.is_some() {
        debug!(org = %org_id, knowledge = %item.id, "duplicate create, skipping");
        return Ok(());
    }
    engine.storage().save_item(&item)?;
    engine.storage().save_record(&record)?;
    engine.log_activity(org_id, &item.id, ActivityKind::Create, &author, record.created_at)?;
    engine.emit(EngineEvent::KnowledgeCreated {
        org_id: org_id.clone(),
        knowledge_id: item.id,
    });
    Ok(())
}

/// Last-writer-wins: applied only when the payload timestamp is strictly
/// newer than the stored record.
async fn apply_update(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    knowledge_id: &KnowledgeId,
    updates: KnowledgeUpdates,
    author: MemberId,
    timestamp: i64,
) -> MeshResult<()> {
    let lock = engine.record_lock(org_id, knowledge_id);
    let _guard = lock.lock().await;
    let Some(mut record) = engine.storage().load_record(org_id, knowledge_id)? else {
        debug!(org = %org_id, knowledge = %knowledge_id, "update for unknown record, dropping");
        return Ok(());
    };
    if timestamp <= record.updated_at {
        debug!(
            org = %org_id,
            knowledge = %knowledge_id,
            timestamp,
            stored = record.updated_at,
            "stale update, dropping"
        );
        return Ok(());
    }
    let Some(mut item) = engine.storage().load_item(knowledge_id)? else {
        debug!(org = %org_id, knowledge = %knowledge_id, "update without item, dropping");
        return Ok(());
    };

    apply_knowledge_updates(&mut item, &mut record, &updates, &author, timestamp);
    engine.storage().save_item(&item)?;
    engine.storage().save_record(&record)?;
    engine.log_activity(org_id, knowledge_id, ActivityKind::Edit, &author, timestamp)?;
    engine.emit(EngineEvent::KnowledgeUpdated {
        org_id: org_id.clone(),
        knowledge_id: knowledge_id.clone(),
    });
    Ok(())
}

/// Idempotent: deleting an absent record is a no-op.
async fn apply_delete(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    knowledge_id: &KnowledgeId,
    deleted_by: MemberId,
    timestamp: i64,
) -> MeshResult<()> {
    let lock = engine.record_lock(org_id, knowledge_id);
    let _guard = lock.lock().await;
    if !engine.storage().delete_record(org_id, knowledge_id)? {
        return Ok(());
    }
    engine.log_activity(org_id, knowledge_id, ActivityKind::Delete, &deleted_by, timestamp)?;
    engine.emit(EngineEvent::KnowledgeDeleted {
        org_id: org_id.clone(),
        knowledge_id: knowledge_id.clone(),
    });
    Ok(())
}

async fn apply_move(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    knowledge_id: &KnowledgeId,
    target_folder_id: Option<FolderId>,
    moved_by: MemberId,
    timestamp: i64,
) -> MeshResult<()> {
    let lock = engine.record_lock(org_id, knowledge_id);
    let _guard = lock.lock().await;
    let Some(mut record) = engine.storage().load_record(org_id, knowledge_id)? else {
        debug!(org = %org_id, knowledge = %knowledge_id, "move for unknown record, dropping");
        return Ok(());
    };
    if timestamp <= record.updated_at {
        debug!(org = %org_id, knowledge = %knowledge_id, "stale move, dropping");
        return Ok(());
    }
    if let Some(folder_id) = &target_folder_id {
        if engine.storage().load_folder(org_id, folder_id)?.is_none() {
            debug!(org = %org_id, folder = %folder_id, "move into unknown folder, dropping");
            return Ok(());
        }
    }
    record.folder_id = target_folder_id.clone();
    record.last_edited_by = moved_by.clone();
    record.updated_at = timestamp;
    engine.storage().save_record(&record)?;
    engine.log_activity(org_id, knowledge_id, ActivityKind::Move, &moved_by, timestamp)?;
    engine.emit(EngineEvent::KnowledgeMoved {
        org_id: org_id.clone(),
        knowledge_id: knowledge_id.clone(),
        folder_id: target_folder_id,
    });
    Ok(())
}

async fn apply_folder_create(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    folder: Folder,
) -> MeshResult<()> {
    if folder.org_id != *org_id {
        debug!(org = %org_id, "dropping folder create for foreign org");
        return Ok(());
    }
    let lock = engine.folder_lock(org_id, &folder.id);
    let _guard = lock.lock().await;
    if engine.storage().load_folder(org_id, &folder.id)?.is_some() {
        return Ok(());
    }
    if let Some(parent) = &folder.parent_folder_id {
        if engine.storage().load_folder(org_id, parent)?.is_none() {
            debug!(org = %org_id, folder = %folder.id, "folder create under unknown parent, dropping");
            return Ok(());
        }
    }
    let folder_id = folder.id.clone();
    engine.storage().save_folder(&folder)?;
    engine.emit(EngineEvent::FolderCreated {
        org_id: org_id.clone(),
        folder_id,
    });
    Ok(())
}

async fn apply_folder_update(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    folder_id: &FolderId,
    updates: FolderUpdates,
    timestamp: i64,
) -> MeshResult<()> {
    let lock = engine.folder_lock(org_id, folder_id);
    let _guard = lock.lock().await;
    let Some(mut folder) = engine.storage().load_folder(org_id, folder_id)? else {
        debug!(org = %org_id, folder = %folder_id, "update for unknown folder, dropping");
        return Ok(());
    };
    if timestamp <= folder.updated_at {
        debug!(org = %org_id, folder = %folder_id, "stale folder update, dropping");
        return Ok(());
    }
    if !updates.move_to_root {
        if let Some(new_parent) = &updates.parent_folder_id {
            if engine.storage().load_folder(org_id, new_parent)?.is_none() {
                debug!(org = %org_id, folder = %folder_id, "reparent to unknown folder, dropping");
                return Ok(());
            }
            // The cycle rule holds for remote reparents too.
            if engine.storage().is_descendant(org_id, new_parent, folder_id)? {
                debug!(org = %org_id, folder = %folder_id, "remote reparent would form a cycle, dropping");
                return Ok(());
            }
        }
    }
    apply_folder_updates(&mut folder, &updates, timestamp);
    engine.storage().save_folder(&folder)?;
    engine.emit(EngineEvent::FolderUpdated {
        org_id: org_id.clone(),
        folder_id: folder_id.clone(),
    });
    Ok(())
}

async fn apply_folder_delete(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    folder_id: &FolderId,
) -> MeshResult<()> {
    let lock = engine.folder_lock(org_id, folder_id);
    let _guard = lock.lock().await;
    let Some(folder) = engine.storage().load_folder(org_id, folder_id)? else {
        return Ok(());
    };
    reparent_contents(engine.storage(), org_id, &folder, crate::types::now_ms())?;
    engine.storage().delete_folder(org_id, folder_id)?;
    engine.emit(EngineEvent::FolderDeleted {
        org_id: org_id.clone(),
        folder_id: folder_id.clone(),
    });
    Ok(())
}

/// Anti-entropy responder: everything strictly newer than the requester's
/// watermark goes back as a direct SYNC_RESPONSE. The response is sent to
/// the transport peer the request came from, since a fresh joiner may not
/// be in the online set yet.
async fn answer_sync_request(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    peer: &PeerHandle,
    last_sync_time: i64,
    requested_by: MemberId,
) -> MeshResult<()> {
    let entries: Vec<SyncEntry> = engine
        .storage()
        .records_updated_since(org_id, last_sync_time)?
        .into_iter()
        .map(|(item, record)| SyncEntry { item, record })
        .collect();

    debug!(
        org = %org_id,
        %requested_by,
        last_sync_time,
        entries = entries.len(),
        "answering sync request"
    );

    let response = Payload::SyncResponse { knowledge: entries };
    if let Err(e) = engine.overlay().send_direct_to_peer(org_id, peer, response).await {
        warn!(org = %org_id, %peer, error = %e, "failed to send sync response");
    }
    Ok(())
}

/// Apply a batch of `{item, record}` entries with create-or-LWW semantics
/// and advance the sync cursor to the newest applied timestamp.
async fn apply_sync_response(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    entries: Vec<SyncEntry>,
    sync_in_progress: &AtomicBool,
) -> MeshResult<()> {
    if sync_in_progress.swap(true, Ordering::SeqCst) {
        debug!(org = %org_id, "sync already in progress, dropping response");
        return Ok(());
    }
    let result = apply_sync_entries(engine, org_id, entries).await;
    sync_in_progress.store(false, Ordering::SeqCst);
    result
}

async fn apply_sync_entries(
    engine: &KnowledgeEngine,
    org_id: &OrgId,
    entries: Vec<SyncEntry>,
) -> MeshResult<()> {
    let mut applied = 0usize;
    let mut newest = 0i64;
    for entry in entries {
        if entry.record.org_id != *org_id || entry.record.knowledge_id != entry.item.id {
            debug!(org = %org_id, "dropping inconsistent sync entry");
            continue;
        }
        newest = newest.max(entry.record.updated_at);
        let lock = engine.record_lock(org_id, &entry.item.id);
        let _guard = lock.lock().await;
        match engine.storage().load_record(org_id, &entry.item.id)? {
            None => {
                engine.storage().save_item(&entry.item)?;
                engine.storage().save_record(&entry.record)?;
                engine.log_activity(
                    org_id,
                    &entry.item.id,
                    ActivityKind::Create,
                    &entry.record.created_by,
                    entry.record.created_at,
                )?;
                engine.emit(EngineEvent::KnowledgeCreated {
                    org_id: org_id.clone(),
                    knowledge_id: entry.item.id.clone(),
                });
                applied += 1;
            }
            Some(stored) if entry.record.updated_at > stored.updated_at => {
                engine.storage().save_item(&entry.item)?;
                engine.storage().save_record(&entry.record)?;
                engine.log_activity(
                    org_id,
                    &entry.item.id,
                    ActivityKind::Edit,
                    &entry.record.last_edited_by,
                    entry.record.updated_at,
                )?;
                engine.emit(EngineEvent::KnowledgeUpdated {
                    org_id: org_id.clone(),
                    knowledge_id: entry.item.id.clone(),
                });
                applied += 1;
            }
            Some(_) => {}
        }
    }
    if newest > 0 {
        engine.storage().advance_cursor(org_id, newest)?;
    }
    engine.emit(EngineEvent::SyncCompleted {
        org_id: org_id.clone(),
        applied,
    });
    Ok(())
}
