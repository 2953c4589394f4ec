//! Persistent local space over redb

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::branch::{Branch, Params, Volume};
use crate::error::{SyncError, SyncResult};
use crate::storage::{BranchRecord, Storage, StorageCell, StorageStore};
use crate::types::StoreRole;

use super::{Space, Span, Visit};

/// Space persisted in a repository's redb database.
///
/// Branch records and head cells are keyed by name; the three object stores
/// are content-addressed and shared across branches, so a forked branch costs
/// only a record and a cell. Deleting a branch drops its record and cell;
/// unreferenced objects are left for garbage collection.
pub struct LocalSpace {
    storage: Storage,
}

impl LocalSpace {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    fn make_branch(&self, name: &str, record: BranchRecord) -> Branch {
        Branch {
            volume: Volume {
                cell: Arc::new(StorageCell::new(self.storage.clone(), name)),
                vc: Arc::new(StorageStore::new(self.storage.clone(), StoreRole::Vc)),
                fs: Arc::new(StorageStore::new(self.storage.clone(), StoreRole::Fs)),
                raw: Arc::new(StorageStore::new(self.storage.clone(), StoreRole::Raw)),
            },
            salt: record.salt,
            annotations: record.annotations,
            created_at: record.created_at,
        }
    }
}

#[async_trait]
impl Space for LocalSpace {
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch> {
        let record = BranchRecord {
            salt: params.salt,
            annotations: params.annotations,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.storage.create_branch_record(name, &record)?;
        info!(branch = name, "created branch");
        Ok(self.make_branch(name, record))
    }

    async fn get(&self, name: &str) -> SyncResult<Branch> {
        match self.storage.load_branch_record(name)? {
            Some(record) => Ok(self.make_branch(name, record)),
            None => Err(SyncError::NotExist(name.to_string())),
        }
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        self.storage.delete_branch_record(name)?;
        info!(branch = name, "deleted branch");
        Ok(())
    }

    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()> {
        let names = self
            .storage
            .list_branch_names(&span.begin, span.end.as_deref())?;
        for name in names {
            visit(&name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::{get_head, set_head};
    use crate::space::collect_names;
    use crate::types::ObjectId;
    use tempfile::TempDir;

    fn local_space() -> (LocalSpace, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().join("repo.redb")).unwrap();
        (LocalSpace::new(storage), temp)
    }

    #[tokio::test]
    async fn test_create_persists_salt_and_annotations() {
        let (space, _temp) = local_space();
        let mut params = Params {
            salt: vec![9, 9, 9],
            ..Default::default()
        };
        params
            .annotations
            .insert("owner".to_string(), "alice".to_string());

        space.create("master", params.clone()).await.unwrap();
        let branch = space.get("master").await.unwrap();
        assert_eq!(branch.salt, vec![9, 9, 9]);
        assert_eq!(branch.annotations.get("owner").unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_heads_survive_reresolution() {
        let (space, _temp) = local_space();
        space.create("master", Params::default()).await.unwrap();

        let branch = space.get("master").await.unwrap();
        let id = ObjectId::for_bytes(b"snap");
        set_head(&branch.volume, id).await.unwrap();

        let again = space.get("master").await.unwrap();
        assert_eq!(get_head(&again.volume).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_delete_clears_record_and_cell() {
        let (space, _temp) = local_space();
        space.create("master", Params::default()).await.unwrap();
        let branch = space.get("master").await.unwrap();
        set_head(&branch.volume, ObjectId::for_bytes(b"snap"))
            .await
            .unwrap();

        space.delete("master").await.unwrap();
        assert!(!space.exists("master").await.unwrap());

        // Re-creating the name starts from an empty head.
        space.create("master", Params::default()).await.unwrap();
        let fresh = space.get("master").await.unwrap();
        assert!(get_head(&fresh.volume).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_for_each_sorted() {
        let (space, _temp) = local_space();
        for name in ["mybranch", "master", "archive"] {
            space.create(name, Params::default()).await.unwrap();
        }
        let names = collect_names(&space, Span::all()).await.unwrap();
        assert_eq!(names, ["archive", "master", "mybranch"]);
    }
}
