//! Append-only activity log
//!
//! One entry per successful local or remote apply. Entries are keyed by
//! `<org-b58>/<ulid>` so redb's sorted iteration yields them in append
//! order; readers get newest-first.

use redb::ReadableTable;

use super::{Storage, ACTIVITY_TABLE};
use crate::error::MeshError;
use crate::types::{ActivityLogEntry, KnowledgeId, OrgId};

impl Storage {
    /// Append one activity entry. Entries are never mutated or deleted.
    pub fn append_activity(&self, entry: &ActivityLogEntry) -> Result<(), MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTIVITY_TABLE)?;
            let data =
                serde_json::to_vec(entry).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = format!("{}/{}", entry.org_id.to_base58(), self.next_key_ulid());
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Activity entries for an organization, newest first, optionally
    /// filtered to one knowledge item and capped at `limit`.
    pub fn activity_log(
        &self,
        org_id: &OrgId,
        knowledge_id: Option<&KnowledgeId>,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ACTIVITY_TABLE)?;
        let prefix = format!("{}/", org_id.to_base58());

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let parsed: ActivityLogEntry = serde_json::from_slice(value.value())
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            if let Some(kid) = knowledge_id {
                if parsed.knowledge_id != *kid {
                    continue;
                }
            }
            entries.push(parsed);
        }

        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::create_test_storage;
    use crate::types::{ActivityKind, ActivityLogEntry, KnowledgeId, MemberId, OrgId};

    fn entry(org: &OrgId, kid: &KnowledgeId, kind: ActivityKind, ts: i64) -> ActivityLogEntry {
        ActivityLogEntry {
            org_id: org.clone(),
            knowledge_id: kid.clone(),
            kind,
            actor: MemberId::from("did:example:alice"),
            timestamp: ts,
        }
    }

    #[test]
    fn test_activity_newest_first() {
        let (storage, _temp) = create_test_storage();
        let org = OrgId::new();
        let kid = KnowledgeId::new();

        storage
            .append_activity(&entry(&org, &kid, ActivityKind::Create, 1))
            .unwrap();
        storage
            .append_activity(&entry(&org, &kid, ActivityKind::Edit, 2))
            .unwrap();
        storage
            .append_activity(&entry(&org, &kid, ActivityKind::Delete, 3))
            .unwrap();

        let log = storage.activity_log(&org, None, 10).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, ActivityKind::Delete);
        assert_eq!(log[2].kind, ActivityKind::Create);
    }

    #[test]
    fn test_activity_limit_and_filter() {
        let (storage, _temp) = create_test_storage();
        let org = OrgId::new();
        let kid_a = KnowledgeId::new();
        let kid_b = KnowledgeId::new();

        for i in 0..5 {
            storage
                .append_activity(&entry(&org, &kid_a, ActivityKind::Edit, i))
                .unwrap();
        }
        storage
            .append_activity(&entry(&org, &kid_b, ActivityKind::Create, 99))
            .unwrap();

        let limited = storage.activity_log(&org, None, 2).unwrap();
        assert_eq!(limited.len(), 2);

        let filtered = storage.activity_log(&org, Some(&kid_b), 10).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].kind, ActivityKind::Create);
    }

    #[test]
    fn test_activity_scoped_to_org() {
        let (storage, _temp) = create_test_storage();
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        let kid = KnowledgeId::new();

        storage
            .append_activity(&entry(&org_a, &kid, ActivityKind::Create, 1))
            .unwrap();

        assert_eq!(storage.activity_log(&org_a, None, 10).unwrap().len(), 1);
        assert!(storage.activity_log(&org_b, None, 10).unwrap().is_empty());
    }
}
