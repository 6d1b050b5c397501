//! Folder hierarchy operations
//!
//! Folders form a tree per organization: the parent chain is acyclic and
//! terminates at a root (`parent_folder_id = None`). [`Storage::is_descendant`]
//! is the check callers use before reparenting.

use redb::ReadableTable;

use super::{Storage, FOLDERS_TABLE};
use crate::error::MeshError;
use crate::types::{Folder, FolderId, OrgId};

/// Upper bound on parent-chain walks, guards against corrupt data
const MAX_FOLDER_DEPTH: usize = 256;

fn folder_key(org_id: &OrgId, folder_id: &FolderId) -> String {
    format!("{}/{}", org_id.to_base58(), folder_id.0)
}

impl Storage {
    /// Save a folder (insert or overwrite).
    pub fn save_folder(&self, folder: &Folder) -> Result<(), MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let data =
                serde_json::to_vec(folder).map_err(|e| MeshError::Serialization(e.to_string()))?;
            let key = folder_key(&folder.org_id, &folder.id);
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a folder by id.
    pub fn load_folder(
        &self,
        org_id: &OrgId,
        folder_id: &FolderId,
    ) -> Result<Option<Folder>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(FOLDERS_TABLE)?;
        let key = folder_key(org_id, folder_id);

        match table.get(key.as_str())? {
            Some(v) => {
                let folder: Folder = serde_json::from_slice(v.value())
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                Ok(Some(folder))
            }
            None => Ok(None),
        }
    }

    /// Remove a folder, returning whether anything was removed.
    pub fn delete_folder(&self, org_id: &OrgId, folder_id: &FolderId) -> Result<bool, MeshError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(FOLDERS_TABLE)?;
            let key = folder_key(org_id, folder_id);
            let removed = table.remove(key.as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All folders of an organization.
    pub fn list_folders(&self, org_id: &OrgId) -> Result<Vec<Folder>, MeshError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(FOLDERS_TABLE)?;
        let prefix = format!("{}/", org_id.to_base58());

        let mut folders = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let folder: Folder = serde_json::from_slice(value.value())
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            folders.push(folder);
        }
        Ok(folders)
    }

    /// Direct children of a folder.
    pub fn child_folders(
        &self,
        org_id: &OrgId,
        parent: &FolderId,
    ) -> Result<Vec<Folder>, MeshError> {
        Ok(self
            .list_folders(org_id)?
            .into_iter()
            .filter(|f| f.parent_folder_id.as_ref() == Some(parent))
            .collect())
    }

    /// Whether `candidate` sits somewhere below `ancestor` in the tree.
    ///
    /// Walks `candidate`'s parent chain; a missing parent terminates the walk.
    pub fn is_descendant(
        &self,
        org_id: &OrgId,
        candidate: &FolderId,
        ancestor: &FolderId,
    ) -> Result<bool, MeshError> {
        let mut current = candidate.clone();
        for _ in 0..MAX_FOLDER_DEPTH {
            if current == *ancestor {
                return Ok(true);
            }
            match self.load_folder(org_id, &current)? {
                Some(folder) => match folder.parent_folder_id {
                    Some(parent) => current = parent,
                    None => return Ok(false),
                },
                None => return Ok(false),
            }
        }
        Ok(false)
    }
}
