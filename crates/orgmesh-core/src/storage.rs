//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Knowledge items (the underlying documents, never hard-deleted here)
//! - Organization knowledge records (per-org visibility + permissions)
//! - Folder hierarchy
//! - The append-only activity log
//! - Sync cursors and the offline outbox

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use redb::{Database, TableDefinition};
use ulid::{Generator, Ulid};

use crate::error::MeshError;

// Submodules
mod activity;
mod folders;
mod knowledge;
mod outbox;

pub use outbox::SyncCursor;

// Table definitions. Org-scoped tables use "<org-b58>/<id>" keys so one
// organization's rows form a contiguous, prefix-scannable range.
const KNOWLEDGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("knowledge_items");
const ORG_RECORDS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("org_knowledge_records");
const FOLDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("folders");
const ACTIVITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("activity_log");
const CURSORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_cursors");
const OUTBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
    // Monotonic within a process so same-millisecond keys still sort in
    // append order.
    id_gen: Arc<Mutex<Generator>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KNOWLEDGE_TABLE)?;
            let _ = write_txn.open_table(ORG_RECORDS_TABLE)?;
            let _ = write_txn.open_table(FOLDERS_TABLE)?;
            let _ = write_txn.open_table(ACTIVITY_TABLE)?;
            let _ = write_txn.open_table(CURSORS_TABLE)?;
            let _ = write_txn.open_table(OUTBOX_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            id_gen: Arc::new(Mutex::new(Generator::new())),
        })
    }

    pub(crate) fn next_key_ulid(&self) -> Ulid {
        self.id_gen
            .lock()
            .generate()
            .unwrap_or_else(|_| Ulid::new())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_can_be_created() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        assert!(Storage::new(&db_path).is_ok());
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }
}
