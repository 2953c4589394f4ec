//! In-memory space

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::branch::{Branch, Params, Volume};
use crate::cell::MemCell;
use crate::error::{SyncError, SyncResult};
use crate::store::MemStore;

use super::{Space, Span, Visit};

struct MemBranch {
    volume: Volume,
    salt: Vec<u8>,
    annotations: BTreeMap<String, String>,
    created_at: i64,
}

impl MemBranch {
    fn to_branch(&self) -> Branch {
        Branch {
            volume: self.volume.clone(),
            salt: self.salt.clone(),
            annotations: self.annotations.clone(),
            created_at: self.created_at,
        }
    }
}

/// Space holding every branch in process memory.
///
/// Each branch gets a fresh volume: one `MemCell` plus three `MemStore`s.
/// Used by tests and as the backing space of served scratch repositories.
#[derive(Default)]
pub struct MemSpace {
    branches: RwLock<BTreeMap<String, MemBranch>>,
}

impl MemSpace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Space for MemSpace {
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch> {
        let mut branches = self.branches.write();
        if branches.contains_key(name) {
            return Err(SyncError::AlreadyExists(name.to_string()));
        }
        let state = MemBranch {
            volume: Volume {
                cell: Arc::new(MemCell::new()),
                vc: Arc::new(MemStore::new()),
                fs: Arc::new(MemStore::new()),
                raw: Arc::new(MemStore::new()),
            },
            salt: params.salt,
            annotations: params.annotations,
            created_at: chrono::Utc::now().timestamp(),
        };
        let branch = state.to_branch();
        branches.insert(name.to_string(), state);
        Ok(branch)
    }

    async fn get(&self, name: &str) -> SyncResult<Branch> {
        self.branches
            .read()
            .get(name)
            .map(MemBranch::to_branch)
            .ok_or_else(|| SyncError::NotExist(name.to_string()))
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        match self.branches.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotExist(name.to_string())),
        }
    }

    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()> {
        let names: Vec<String> = self
            .branches
            .read()
            .keys()
            .filter(|name| span.contains(name))
            .cloned()
            .collect();
        for name in names {
            visit(&name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::space::collect_names;

    #[tokio::test]
    async fn test_create_get_delete() {
        let space = MemSpace::new();
        let branch = space.create("master", Params::default()).await.unwrap();
        assert!(branch.salt.is_empty());

        assert!(space.exists("master").await.unwrap());
        assert!(!space.exists("other").await.unwrap());

        space.delete("master").await.unwrap();
        assert!(space.get("master").await.unwrap_err().is_not_exist());
        assert!(space.delete("master").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let space = MemSpace::new();
        space.create("master", Params::default()).await.unwrap();
        let err = space.create("master", Params::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_for_each_is_sorted_and_spanned() {
        let space = MemSpace::new();
        for name in ["c", "a", "d", "b"] {
            space.create(name, Params::default()).await.unwrap();
        }

        let all = collect_names(&space, Span::all()).await.unwrap();
        assert_eq!(all, ["a", "b", "c", "d"]);

        let some = collect_names(
            &space,
            Span {
                begin: "b".to_string(),
                end: Some("d".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(some, ["b", "c"]);
    }

    #[tokio::test]
    async fn test_visit_error_aborts() {
        let space = MemSpace::new();
        for name in ["a", "b", "c"] {
            space.create(name, Params::default()).await.unwrap();
        }
        let mut seen = 0;
        let result = space
            .for_each(Span::all(), &mut |_| {
                seen += 1;
                if seen == 2 {
                    Err(SyncError::InvalidOperation("stop".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_volumes_are_shared_per_branch() {
        let space = MemSpace::new();
        space.create("master", Params::default()).await.unwrap();

        let a = space.get("master").await.unwrap();
        let b = space.get("master").await.unwrap();

        // Two resolutions of one branch observe the same cell.
        a.volume
            .cell
            .compare_and_swap(b"", b"head")
            .await
            .unwrap();
        assert_eq!(b.volume.cell.read().await.unwrap(), b"head");
    }
}
