//! Content-addressed file trees
//!
//! A tree is a flat, name-sorted listing of file entries, postcard-encoded
//! into the volume's FS store. File bytes live as single blobs in the raw
//! store. Trees are immutable; "modifying" one posts a new tree object and
//! returns its id.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::store::{copy_missing, Store};
use crate::types::ObjectId;

/// One file in a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// File name, unique within the tree
    pub name: String,
    /// Raw-store id of the file bytes
    pub id: ObjectId,
    /// File size in bytes
    pub size: u64,
}

/// A flat directory listing, entries sorted ascending by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Insert or replace an entry, keeping the listing sorted
    pub fn upsert(&mut self, entry: TreeEntry) {
        match self
            .entries
            .binary_search_by(|e| e.name.as_str().cmp(entry.name.as_str()))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    fn encode(&self) -> SyncResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    fn decode(data: &[u8]) -> SyncResult<Self> {
        let tree: Tree =
            postcard::from_bytes(data).map_err(|e| SyncError::Serialization(e.to_string()))?;
        if !tree.entries.windows(2).all(|w| w[0].name < w[1].name) {
            return Err(SyncError::Serialization(
                "tree entries not strictly sorted".to_string(),
            ));
        }
        Ok(tree)
    }
}

/// Post an empty tree, returning the root id of an empty filesystem
pub async fn empty_root(fs: &dyn Store) -> SyncResult<ObjectId> {
    post_tree(fs, &Tree::default()).await
}

/// Post a tree object
pub async fn post_tree(fs: &dyn Store, tree: &Tree) -> SyncResult<ObjectId> {
    fs.post(&tree.encode()?).await
}

/// Fetch and decode a tree object
pub async fn get_tree(fs: &dyn Store, root: &ObjectId) -> SyncResult<Tree> {
    Tree::decode(&fs.get(root).await?)
}

/// Add or replace one file, returning the new root id
pub async fn create_file(
    fs: &dyn Store,
    raw: &dyn Store,
    root: &ObjectId,
    name: &str,
    data: &[u8],
) -> SyncResult<ObjectId> {
    let mut tree = get_tree(fs, root).await?;
    let id = raw.post(data).await?;
    tree.upsert(TreeEntry {
        name: name.to_string(),
        id,
        size: data.len() as u64,
    });
    post_tree(fs, &tree).await
}

/// Read one file's bytes out of a tree
pub async fn read_file(
    fs: &dyn Store,
    raw: &dyn Store,
    root: &ObjectId,
    name: &str,
) -> SyncResult<Vec<u8>> {
    let tree = get_tree(fs, root).await?;
    let entry = tree
        .get(name)
        .ok_or_else(|| SyncError::NotExist(name.to_string()))?;
    raw.get(&entry.id).await
}

/// List a tree's entries, name-ascending
pub async fn list(fs: &dyn Store, root: &ObjectId) -> SyncResult<Vec<TreeEntry>> {
    Ok(get_tree(fs, root).await?.entries)
}

/// Copy a root's tree object and every referenced blob into `dst` stores.
///
/// Returns the number of objects that actually moved.
pub async fn sync_root(
    src_fs: &dyn Store,
    src_raw: &dyn Store,
    dst_fs: &dyn Store,
    dst_raw: &dyn Store,
    root: &ObjectId,
) -> SyncResult<u64> {
    if dst_fs.exists(root).await? {
        return Ok(0);
    }
    let tree = get_tree(src_fs, root).await?;
    let mut copied = 0u64;
    for entry in &tree.entries {
        if copy_missing(src_raw, dst_raw, &entry.id).await? {
            copied += 1;
        }
    }
    // The tree object goes last so its presence implies its blobs are too.
    if copy_missing(src_fs, dst_fs, root).await? {
        copied += 1;
    }
    Ok(copied)
}
