//! Branches and volumes
//!
//! A volume bundles the head cell with the three content-addressed stores;
//! a branch is a volume plus provenance metadata. Volume synchronization is
//! the merge primitive of the whole system: copy the reachable object graph,
//! then move the destination head with one compare-and-swap.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info};

use crate::cell::{apply, apply_async, Cell};
use crate::error::{SyncError, SyncResult};
use crate::store::Store;
use crate::types::ObjectId;
use crate::vc::{self, Snapshot};

/// A head cell plus the three stores it points into
#[derive(Clone)]
pub struct Volume {
    /// Head pointer; empty value means no snapshot yet
    pub cell: Arc<dyn Cell>,
    /// Version-control objects (snapshots)
    pub vc: Arc<dyn Store>,
    /// Filesystem objects (trees)
    pub fs: Arc<dyn Store>,
    /// Raw file bytes
    pub raw: Arc<dyn Store>,
}

/// A named mutable pointer into an immutable object graph
#[derive(Clone)]
pub struct Branch {
    pub volume: Volume,
    /// Content-derivation domain; two branches must share it to merge
    pub salt: Vec<u8>,
    /// Caller-defined ordered metadata
    pub annotations: BTreeMap<String, String>,
    /// Unix timestamp of creation
    pub created_at: i64,
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("salt", &self.salt)
            .field("annotations", &self.annotations)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Caller-supplied parameters for branch creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub salt: Vec<u8>,
    pub annotations: BTreeMap<String, String>,
}

/// Decode a cell value into a head reference; empty means none
pub fn decode_head(bytes: &[u8]) -> SyncResult<Option<ObjectId>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let id: ObjectId =
        serde_json::from_slice(bytes).map_err(|e| SyncError::Serialization(e.to_string()))?;
    Ok(Some(id))
}

/// Encode a head reference into cell bytes
pub fn encode_head(id: &ObjectId) -> SyncResult<Vec<u8>> {
    serde_json::to_vec(id).map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Read a volume's current head
pub async fn get_head(volume: &Volume) -> SyncResult<Option<ObjectId>> {
    decode_head(&volume.cell.read().await?)
}

/// Point a volume's head at `id`, unconditionally
pub async fn set_head(volume: &Volume, id: ObjectId) -> SyncResult<()> {
    let next = encode_head(&id)?;
    apply(volume.cell.as_ref(), move |_| Ok(next.clone())).await
}

/// Merge `src` into `dst`: copy the reachable object graph, then CAS the head.
///
/// The copy phase is idempotent and requires no coordination; only the final
/// head update serializes against concurrent writers. With `force` unset the
/// update commits only when the destination's head at swap time is an
/// ancestor of (or equal to) the source head, otherwise `NotFastForward`.
pub async fn sync_volumes(dst: &Volume, src: &Volume, force: bool) -> SyncResult<()> {
    let src_head = match get_head(src).await? {
        Some(head) => head,
        None => {
            // Nothing to copy. An empty source can only overwrite by force.
            return apply(dst.cell.as_ref(), move |cur| {
                if cur.is_empty() || force {
                    Ok(Vec::new())
                } else {
                    Err(SyncError::NotFastForward)
                }
            })
            .await;
        }
    };

    let copied = vc::sync(
        src.vc.as_ref(),
        src.fs.as_ref(),
        src.raw.as_ref(),
        dst.vc.as_ref(),
        dst.fs.as_ref(),
        dst.raw.as_ref(),
        &src_head,
    )
    .await?;
    debug!(head = %src_head, copied, "volume copy phase done");

    apply_async(dst.cell.as_ref(), move |cur| {
        async move {
            if !force {
                if let Some(cur_id) = decode_head(&cur)? {
                    if !vc::is_ancestor(dst.vc.as_ref(), &cur_id, &src_head).await? {
                        return Err(SyncError::NotFastForward);
                    }
                }
            }
            encode_head(&src_head)
        }
        .boxed()
    })
    .await?;
    info!(head = %src_head, force, "volume head updated");
    Ok(())
}

/// Walk a branch's snapshot ancestry newest-first, invoking `visit(ref, snapshot)`
pub async fn history<F>(branch: &Branch, visit: F) -> SyncResult<()>
where
    F: FnMut(ObjectId, &Snapshot) -> SyncResult<()> + Send,
{
    match get_head(&branch.volume).await? {
        Some(head) => vc::for_each_ancestor(branch.volume.vc.as_ref(), &head, visit).await,
        None => Ok(()),
    }
}
