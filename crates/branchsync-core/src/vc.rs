//! Version-control snapshots and their ancestry graph
//!
//! A snapshot is one committed state: a filesystem root plus a link to its
//! parent snapshot. Snapshots are postcard-encoded and content-addressed in
//! the volume's VC store, so the head id transitively names the whole
//! history.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::fs;
use crate::store::{copy_missing, Store};
use crate::types::ObjectId;

/// One committed state of a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Previous snapshot; `None` for the first commit
    pub parent: Option<ObjectId>,
    /// FS-store id of the filesystem root at this commit
    pub root: ObjectId,
    /// Unix timestamp of the commit
    pub created_at: i64,
    /// Commit message
    pub message: String,
}

impl Snapshot {
    fn encode(&self) -> SyncResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    fn decode(data: &[u8]) -> SyncResult<Self> {
        postcard::from_bytes(data).map_err(|e| SyncError::Serialization(e.to_string()))
    }
}

/// Post a snapshot object, returning its reference
pub async fn post_snapshot(vc: &dyn Store, snapshot: &Snapshot) -> SyncResult<ObjectId> {
    vc.post(&snapshot.encode()?).await
}

/// Fetch and decode a snapshot
pub async fn get_snapshot(vc: &dyn Store, id: &ObjectId) -> SyncResult<Snapshot> {
    Snapshot::decode(&vc.get(id).await?)
}

/// Whether `candidate` is `head` itself or one of its ancestors.
///
/// This is the fast-forward predicate: a head update from `candidate` to
/// `head` loses no history exactly when this holds.
pub async fn is_ancestor(vc: &dyn Store, candidate: &ObjectId, head: &ObjectId) -> SyncResult<bool> {
    let mut cursor = Some(*head);
    while let Some(id) = cursor {
        if id == *candidate {
            return Ok(true);
        }
        cursor = get_snapshot(vc, &id).await?.parent;
    }
    Ok(false)
}

/// Walk the ancestry newest-first, starting at `head` itself.
///
/// Stops early when `visit` returns an error, propagating it.
pub async fn for_each_ancestor<F>(vc: &dyn Store, head: &ObjectId, mut visit: F) -> SyncResult<()>
where
    F: FnMut(ObjectId, &Snapshot) -> SyncResult<()> + Send,
{
    let mut cursor = Some(*head);
    while let Some(id) = cursor {
        let snapshot = get_snapshot(vc, &id).await?;
        visit(id, &snapshot)?;
        cursor = snapshot.parent;
    }
    Ok(())
}

/// Copy everything reachable from `head` into the destination stores.
///
/// Walks the ancestry until it reaches a snapshot the destination already
/// holds, then replays the missing suffix oldest-first: each snapshot's
/// filesystem objects land before the snapshot object itself, so a present
/// snapshot implies its whole closure is present. Re-running after a partial
/// failure only moves what is still missing.
pub async fn sync(
    src_vc: &dyn Store,
    src_fs: &dyn Store,
    src_raw: &dyn Store,
    dst_vc: &dyn Store,
    dst_fs: &dyn Store,
    dst_raw: &dyn Store,
    head: &ObjectId,
) -> SyncResult<u64> {
    // Newest-first prefix of the chain that the destination is missing.
    let mut missing = Vec::new();
    let mut cursor = Some(*head);
    while let Some(id) = cursor {
        if dst_vc.exists(&id).await? {
            break;
        }
        let snapshot = get_snapshot(src_vc, &id).await?;
        cursor = snapshot.parent;
        missing.push((id, snapshot));
    }

    let mut copied = 0u64;
    for (id, snapshot) in missing.into_iter().rev() {
        copied += fs::sync_root(src_fs, src_raw, dst_fs, dst_raw, &snapshot.root).await?;
        if copy_missing(src_vc, dst_vc, &id).await? {
            copied += 1;
        }
    }
    debug!(head = %head, copied, "synced reachable objects");
    Ok(copied)
}
