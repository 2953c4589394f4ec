//! Content-addressed object stores
//!
//! Stores are append-only: objects are posted, never mutated, and keyed by
//! the BLAKE3 hash of their bytes. Posting the same bytes twice is a no-op
//! returning the same id, which is what makes volume sync resumable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{SyncError, SyncResult};
use crate::types::ObjectId;

/// Maximum size of a single stored object (1 MiB)
///
/// Snapshots and trees are small; raw file blobs carry the payload and are
/// bounded so a single ask-sized transfer can move any object.
pub const MAX_OBJECT_SIZE: usize = 1024 * 1024;

/// A content-addressed store of immutable objects
#[async_trait]
pub trait Store: Send + Sync {
    /// Add an object, returning its content-derived id
    async fn post(&self, data: &[u8]) -> SyncResult<ObjectId>;

    /// Fetch an object's bytes; `NotExist` when absent
    async fn get(&self, id: &ObjectId) -> SyncResult<Vec<u8>>;

    /// Whether an object is present. Never errors on absence.
    async fn exists(&self, id: &ObjectId) -> SyncResult<bool>;

    /// Remove an object; `NotExist` when absent
    async fn delete(&self, id: &ObjectId) -> SyncResult<()>;

    /// Enumerate all object ids, ascending
    async fn list(&self) -> SyncResult<Vec<ObjectId>>;
}

pub(crate) fn check_object_size(len: usize) -> SyncResult<()> {
    if len > MAX_OBJECT_SIZE {
        return Err(SyncError::InvalidOperation(format!(
            "object of {} bytes exceeds store bound of {} bytes",
            len, MAX_OBJECT_SIZE
        )));
    }
    Ok(())
}

/// In-memory store, used by tests and ephemeral volumes
pub struct MemStore {
    objects: RwLock<BTreeMap<ObjectId, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of objects currently held
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn post(&self, data: &[u8]) -> SyncResult<ObjectId> {
        check_object_size(data.len())?;
        let id = ObjectId::for_bytes(data);
        self.objects.write().entry(id).or_insert_with(|| data.to_vec());
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> SyncResult<Vec<u8>> {
        self.objects
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotExist(id.to_string()))
    }

    async fn exists(&self, id: &ObjectId) -> SyncResult<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    async fn delete(&self, id: &ObjectId) -> SyncResult<()> {
        match self.objects.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotExist(id.to_string())),
        }
    }

    async fn list(&self) -> SyncResult<Vec<ObjectId>> {
        Ok(self.objects.read().keys().copied().collect())
    }
}

/// Copy one object from `src` to `dst` unless already present.
///
/// Returns whether bytes actually moved.
pub async fn copy_missing(src: &dyn Store, dst: &dyn Store, id: &ObjectId) -> SyncResult<bool> {
    if dst.exists(id).await? {
        return Ok(false);
    }
    let data = src.get(id).await?;
    let posted = dst.post(&data).await?;
    if posted != *id {
        // The source lied about the object's content.
        return Err(SyncError::Storage(format!(
            "object {} hashed to {} after copy",
            id, posted
        )));
    }
    Ok(true)
}
