//! Sync cursors and the durable offline outbox
//!
//! The cursor records the high-water mark (`last_sync_time`) of remote
//! entries applied during anti-entropy, so the next SYNC_REQUEST only asks
//! for what changed since. The outbox holds envelopes that could not be
//! broadcast while offline; entries are keyed by `<org-b58>/<ulid>` so
//! redb's sorted iteration drains them in enqueue order.

use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use super::{Storage, CURSORS_TABLE, OUTBOX_TABLE};
use crate::error::MeshError;
use crate::overlay::envelope::Envelope;
use crate::types::OrgId;

/// Per-organization anti-entropy watermark.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCursor {
    /// Millisecond timestamp of the newest remote entry applied so far.
    #[serde(rename = "lastSyncTime")]
    pub last_sync_time: i64,
}

impl Storage {
    pub fn load_cursor(&self, org_id: &OrgId) -> Result<SyncCursor, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CURSORS_TABLE)?;
        let key = org_id.to_base58();
        match table.get(key.as_str())? {
            Some(value) => serde_json::from_slice(value.value())
                .map_err(|e| MeshError::Serialization(e.to_string())),
            None => Ok(SyncCursor::default()),
        }
    }

    pub fn save_cursor(&self, org_id: &OrgId, cursor: &SyncCursor) -> Result<(), MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CURSORS_TABLE)?;
            let data =
                serde_json::to_vec(cursor).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = org_id.to_base58();
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Move the cursor forward to `candidate` if it is newer. The cursor
    /// never goes backwards.
    pub fn advance_cursor(&self, org_id: &OrgId, candidate: i64) -> Result<SyncCursor, MeshError> {
        let mut cursor = self.load_cursor(org_id)?;
        if candidate > cursor.last_sync_time {
            cursor.last_sync_time = candidate;
            self.save_cursor(org_id, &cursor)?;
        }
        Ok(cursor)
    }

    /// Queue an envelope for later delivery. Returns the outbox key, which
    /// callers pass back to [`Storage::remove_outbox`] after a successful
    /// re-send.
    pub fn enqueue_outbox(&self, org_id: &OrgId, envelope: &Envelope) -> Result<String, MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let key = format!("{}/{}", org_id.to_base58(), self.next_key_ulid());
        {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            let data = serde_json::to_vec(envelope)
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(key)
    }

    /// Queued envelopes for an organization in enqueue order.
    pub fn outbox(&self, org_id: &OrgId) -> Result<Vec<(String, Envelope)>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;
        let prefix = format!("{}/", org_id.to_base58());

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let envelope: Envelope = serde_json::from_slice(value.value())
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            entries.push((key.value().to_string(), envelope));
        }
        Ok(entries)
    }

    /// Remove a delivered entry. Returns false if the key was already gone.
    pub fn remove_outbox(&self, key: &str) -> Result<bool, MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn outbox_len(&self, org_id: &OrgId) -> Result<usize, MeshError> {
        Ok(self.outbox(org_id)?.len())
    }
}
