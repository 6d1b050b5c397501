//! CRDT document engine backed by Automerge
//!
//! Collaborative knowledge content lives in Automerge documents keyed by a
//! document id. Peers exchange opaque incremental update blobs; Automerge
//! merges are commutative and idempotent, so updates may arrive in any order
//! and any number of times without ordering or deduplication on receipt.
//!
//! Awareness state (cursor positions, ephemeral presence inside a document)
//! is kept in a separate in-memory map and is never persisted.

use std::collections::HashMap;

use automerge::AutoCommit;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::types::MemberId;

/// In-process document engine: Automerge documents plus an ephemeral
/// awareness map, both keyed by document id.
pub struct CrdtEngine {
    docs: Mutex<HashMap<String, AutoCommit>>,
    awareness: Mutex<HashMap<String, HashMap<MemberId, Vec<u8>>>>,
}

impl CrdtEngine {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            awareness: Mutex::new(HashMap::new()),
        }
    }

    /// Apply an incremental update blob to a document, creating the document
    /// if it does not exist yet.
    ///
    /// Applying the same blob twice is a no-op; applying two blobs in either
    /// order converges to the same document state.
    pub fn apply_update(&self, doc_id: &str, update: &[u8]) -> MeshResult<()> {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_insert_with(AutoCommit::new);
        let applied = doc
            .load_incremental(update)
            .map_err(|e| MeshError::Crdt(format!("Failed to apply update: {}", e)))?;
        debug!(doc_id, bytes = update.len(), ops = applied, "Applied CRDT update");
        Ok(())
    }

    /// Full serialized state of a document, `None` if unknown
    pub fn document_bytes(&self, doc_id: &str) -> Option<Vec<u8>> {
        self.docs.lock().get_mut(doc_id).map(|doc| doc.save())
    }

    /// Whether a document exists in the engine
    pub fn has_document(&self, doc_id: &str) -> bool {
        self.docs.lock().contains_key(doc_id)
    }

    /// Load a full document snapshot, replacing any existing state by merge
    pub fn load_document(&self, doc_id: &str, data: &[u8]) -> MeshResult<()> {
        let loaded = AutoCommit::load(data)
            .map_err(|e| MeshError::Crdt(format!("Failed to load document: {}", e)))?;
        let mut docs = self.docs.lock();
        match docs.get_mut(doc_id) {
            Some(existing) => {
                let mut incoming = loaded;
                existing
                    .merge(&mut incoming)
                    .map_err(|e| MeshError::Crdt(format!("Failed to merge document: {}", e)))?;
            }
            None => {
                docs.insert(doc_id.to_string(), loaded);
            }
        }
        Ok(())
    }

    /// Mutate a document locally and return the incremental blob describing
    /// the change, suitable for broadcasting to peers.
    pub fn local_change<F>(&self, doc_id: &str, f: F) -> MeshResult<Vec<u8>>
    where
        F: FnOnce(&mut AutoCommit) -> Result<(), automerge::AutomergeError>,
    {
        let mut docs = self.docs.lock();
        let doc = docs.entry(doc_id.to_string()).or_insert_with(AutoCommit::new);
        let heads = doc.get_heads();
        f(doc).map_err(|e| MeshError::Crdt(format!("Local change failed: {}", e)))?;
        Ok(doc.save_after(&heads))
    }

    /// Record a member's ephemeral awareness blob for a document
    pub fn apply_awareness(&self, doc_id: &str, member: &MemberId, state: Vec<u8>) {
        self.awareness
            .lock()
            .entry(doc_id.to_string())
            .or_default()
            .insert(member.clone(), state);
    }

    /// Snapshot of the awareness map for a document
    pub fn awareness(&self, doc_id: &str) -> HashMap<MemberId, Vec<u8>> {
        self.awareness
            .lock()
            .get(doc_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a member's awareness state (e.g. when they go offline)
    pub fn clear_awareness(&self, doc_id: &str, member: &MemberId) {
        if let Some(map) = self.awareness.lock().get_mut(doc_id) {
            map.remove(member);
        }
    }
}

impl Default for CrdtEngine {
    fn default() -> Self {
        Self::new()
    }
}
