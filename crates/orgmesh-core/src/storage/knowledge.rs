//! Knowledge item and organization record operations

use redb::ReadableTable;

use super::{Storage, KNOWLEDGE_TABLE, ORG_RECORDS_TABLE};
use crate::error::MeshError;
use crate::types::{FolderId, KnowledgeId, KnowledgeItem, OrgId, OrgKnowledgeRecord};

fn record_key(org_id: &OrgId, knowledge_id: &KnowledgeId) -> String {
    format!("{}/{}", org_id.to_base58(), knowledge_id.0)
}

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Knowledge Item Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a knowledge item (insert or overwrite).
    pub fn save_item(&self, item: &KnowledgeItem) -> Result<(), MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(KNOWLEDGE_TABLE)?;
            let data =
                serde_json::to_vec(item).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = item.id.0.to_string();
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a knowledge item by id.
    pub fn load_item(&self, id: &KnowledgeId) -> Result<Option<KnowledgeItem>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(KNOWLEDGE_TABLE)?;
        let key = id.0.to_string();

        match table.get(key.as_str())? {
            Some(v) => {
                let item: KnowledgeItem = serde_json::from_slice(v.value())
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Organization Record Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save an organization knowledge record (insert or overwrite).
    pub fn save_record(&self, record: &OrgKnowledgeRecord) -> Result<(), MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ORG_RECORDS_TABLE)?;
            let data =
                serde_json::to_vec(record).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = record_key(&record.org_id, &record.knowledge_id);
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the record scoping a knowledge item to an organization.
    pub fn load_record(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
    ) -> Result<Option<OrgKnowledgeRecord>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ORG_RECORDS_TABLE)?;
        let key = record_key(org_id, knowledge_id);

        match table.get(key.as_str())? {
            Some(v) => {
                let record: OrgKnowledgeRecord = serde_json::from_slice(v.value())
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Remove a record, returning whether anything was removed.
    ///
    /// This is a soft delete of organization visibility; the underlying
    /// knowledge item is untouched.
    pub fn delete_record(
        &self,
        org_id: &OrgId,
        knowledge_id: &KnowledgeId,
    ) -> Result<bool, MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ORG_RECORDS_TABLE)?;
            let key = record_key(org_id, knowledge_id);
            let removed = table.remove(key.as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All records for an organization.
    pub fn list_records(&self, org_id: &OrgId) -> Result<Vec<OrgKnowledgeRecord>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ORG_RECORDS_TABLE)?;
        let prefix = format!("{}/", org_id.to_base58());

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let record: OrgKnowledgeRecord = serde_json::from_slice(value.value())
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Records in a specific folder (`None` = organization root).
    pub fn list_records_in_folder(
        &self,
        org_id: &OrgId,
        folder_id: Option<&FolderId>,
    ) -> Result<Vec<OrgKnowledgeRecord>, MeshError> {
        Ok(self
            .list_records(org_id)?
            .into_iter()
            .filter(|r| r.folder_id.as_ref() == folder_id)
            .collect())
    }

    /// Records created or updated after the given watermark, joined with
    /// their knowledge items. This is the anti-entropy query: a catch-up
    /// response is built from exactly this set.
    pub fn records_updated_since(
        &self,
        org_id: &OrgId,
        since: i64,
    ) -> Result<Vec<(KnowledgeItem, OrgKnowledgeRecord)>, MeshError> {
        let mut out = Vec::new();
        for record in self.list_records(org_id)? {
            if record.updated_at <= since {
                continue;
            }
            if let Some(item) = self.load_item(&record.knowledge_id)? {
                out.push((item, record));
            }
        }
        Ok(out)
    }
}
