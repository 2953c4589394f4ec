//! Persistent storage using redb
//!
//! One database file per repository, holding:
//! - Branch records (salt, annotations, creation time)
//! - Cell values (branch heads), updated only by compare-and-swap
//! - Content-addressed objects for all three store roles
//! - The active-branch pointer
//! - The staging area

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::cell::{CasOutcome, Cell, DEFAULT_MAX_SIZE};
use crate::error::{SyncError, SyncResult};
use crate::store::{check_object_size, Store};
use crate::types::{ObjectId, StoreRole};

// Table definitions
const BRANCHES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("branches");
const CELLS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cells");
const OBJECTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("config");
const STAGING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("staging");

/// Config key for the persisted active-branch pointer
const KEY_ACTIVE_BRANCH: &str = "active_branch";

/// Durable record of a branch, minus its volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Content-derivation domain; branches must share it to be merge-compatible
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    /// Caller-defined ordered metadata
    pub annotations: BTreeMap<String, String>,
    /// Unix timestamp of creation
    pub created_at: i64,
}

/// A file staged for the next commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedEntry {
    /// Id of the raw blob holding the file bytes
    pub id: ObjectId,
    /// Size of the file in bytes
    pub size: u64,
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a storage instance at the given path.
    ///
    /// Creates the parent directory and all tables if needed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BRANCHES_TABLE)?;
            let _ = write_txn.open_table(CELLS_TABLE)?;
            let _ = write_txn.open_table(OBJECTS_TABLE)?;
            let _ = write_txn.open_table(CONFIG_TABLE)?;
            let _ = write_txn.open_table(STAGING_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Branch records
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a branch record, failing if the name is taken.
    ///
    /// The existence check and the insert run in one write transaction, so
    /// two concurrent creates cannot both succeed.
    pub fn create_branch_record(&self, name: &str, record: &BranchRecord) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(BRANCHES_TABLE)?;
            if table.get(name)?.is_some() {
                return Err(SyncError::AlreadyExists(name.to_string()));
            }
            let data = serde_json::to_vec(record)
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            table.insert(name, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a branch record; `None` when absent
    pub fn load_branch_record(&self, name: &str) -> SyncResult<Option<BranchRecord>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(BRANCHES_TABLE)?;
        match table.get(name)? {
            Some(v) => {
                let record: BranchRecord = serde_json::from_slice(v.value())
                    .map_err(|e| SyncError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Remove a branch record and its cell; `NotExist` when absent
    pub fn delete_branch_record(&self, name: &str) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut branches = write_txn.open_table(BRANCHES_TABLE)?;
            if branches.remove(name)?.is_none() {
                return Err(SyncError::NotExist(name.to_string()));
            }
            let mut cells = write_txn.open_table(CELLS_TABLE)?;
            cells.remove(name)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List branch names in `[begin, end)`, ascending
    pub fn list_branch_names(&self, begin: &str, end: Option<&str>) -> SyncResult<Vec<String>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(BRANCHES_TABLE)?;

        let mut names = Vec::new();
        let iter = match end {
            Some(end) => table.range(begin..end)?,
            None => table.range(begin..)?,
        };
        for entry in iter {
            let (key, _) = entry?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cells
    // ═══════════════════════════════════════════════════════════════════════

    /// Read a cell's current value; absent cells read as empty
    pub fn read_cell(&self, name: &str) -> SyncResult<Vec<u8>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CELLS_TABLE)?;
        Ok(table.get(name)?.map(|v| v.value().to_vec()).unwrap_or_default())
    }

    /// Compare-and-swap a cell's value inside one write transaction.
    ///
    /// The transaction either commits the whole swap or aborts it; a
    /// conflicting writer observes either the old or the new value, never a
    /// partial one.
    pub fn cas_cell(&self, name: &str, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(CELLS_TABLE)?;
            let current = table.get(name)?.map(|v| v.value().to_vec()).unwrap_or_default();
            if current.as_slice() == prev {
                table.insert(name, next)?;
                CasOutcome {
                    swapped: true,
                    current: next.to_vec(),
                }
            } else {
                CasOutcome {
                    swapped: false,
                    current,
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Content-addressed objects
    // ═══════════════════════════════════════════════════════════════════════

    fn object_key(role: StoreRole, id: &ObjectId) -> String {
        format!("{}/{}", role.as_str(), id.to_hex())
    }

    /// Store an object under its content hash for the given role
    pub fn post_object(&self, role: StoreRole, data: &[u8]) -> SyncResult<ObjectId> {
        check_object_size(data.len())?;
        let id = ObjectId::for_bytes(data);
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(OBJECTS_TABLE)?;
            let key = Self::object_key(role, &id);
            if table.get(key.as_str())?.is_none() {
                table.insert(key.as_str(), data)?;
            }
        }
        write_txn.commit()?;
        Ok(id)
    }

    /// Fetch an object's bytes; `NotExist` when absent
    pub fn get_object(&self, role: StoreRole, id: &ObjectId) -> SyncResult<Vec<u8>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OBJECTS_TABLE)?;
        let key = Self::object_key(role, id);
        match table.get(key.as_str())? {
            Some(v) => Ok(v.value().to_vec()),
            None => Err(SyncError::NotExist(id.to_string())),
        }
    }

    /// Whether an object is present
    pub fn object_exists(&self, role: StoreRole, id: &ObjectId) -> SyncResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OBJECTS_TABLE)?;
        let key = Self::object_key(role, id);
        Ok(table.get(key.as_str())?.is_some())
    }

    /// Remove an object; `NotExist` when absent
    pub fn delete_object(&self, role: StoreRole, id: &ObjectId) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(OBJECTS_TABLE)?;
            let key = Self::object_key(role, id);
            let existed = table.remove(key.as_str())?.is_some();
            existed
        };
        write_txn.commit()?;
        if removed {
            Ok(())
        } else {
            Err(SyncError::NotExist(id.to_string()))
        }
    }

    /// Enumerate all object ids for a role, ascending
    pub fn list_objects(&self, role: StoreRole) -> SyncResult<Vec<ObjectId>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(OBJECTS_TABLE)?;

        let prefix = format!("{}/", role.as_str());
        let mut ids = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, _) = entry?;
            let key = key.value();
            let Some(hex_id) = key.strip_prefix(&prefix) else {
                break;
            };
            ids.push(ObjectId::from_hex(hex_id)?);
        }
        Ok(ids)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Active branch pointer
    // ═══════════════════════════════════════════════════════════════════════

    /// Read the persisted active-branch name; empty string when never set
    pub fn get_active_branch(&self) -> SyncResult<String> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CONFIG_TABLE)?;
        match table.get(KEY_ACTIVE_BRANCH)? {
            Some(v) => String::from_utf8(v.value().to_vec())
                .map_err(|e| SyncError::Serialization(e.to_string())),
            None => Ok(String::new()),
        }
    }

    /// Persist the active-branch name
    pub fn set_active_branch(&self, name: &str) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONFIG_TABLE)?;
            table.insert(KEY_ACTIVE_BRANCH, name.as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Config key for the endpoint's transport secret
    const KEY_ENDPOINT_SECRET: &'static str = "endpoint_secret_key";

    /// Load the transport secret key; `None` before first bind
    pub fn load_endpoint_secret(&self) -> SyncResult<Option<[u8; 32]>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(CONFIG_TABLE)?;
        match table.get(Self::KEY_ENDPOINT_SECRET)? {
            Some(v) => {
                let bytes = v.value();
                if bytes.len() != 32 {
                    return Err(SyncError::Storage(
                        "stored endpoint secret is not 32 bytes".to_string(),
                    ));
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                Ok(Some(arr))
            }
            None => Ok(None),
        }
    }

    /// Persist the transport secret key so the peer identity is stable
    pub fn save_endpoint_secret(&self, secret: &[u8; 32]) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONFIG_TABLE)?;
            table.insert(Self::KEY_ENDPOINT_SECRET, secret.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Staging area
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a staged file, replacing any previous entry for the path
    pub fn staging_put(&self, path: &str, entry: &StagedEntry) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(STAGING_TABLE)?;
            let data =
                serde_json::to_vec(entry).map_err(|e| SyncError::Serialization(e.to_string()))?;
            table.insert(path, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Whether any entries are staged
    pub fn staging_is_empty(&self) -> SyncResult<bool> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(STAGING_TABLE)?;
        let is_empty = table.first()?.is_none();
        Ok(is_empty)
    }

    /// All staged entries, path-ascending
    pub fn staging_list(&self) -> SyncResult<Vec<(String, StagedEntry)>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(STAGING_TABLE)?;

        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            let entry: StagedEntry = serde_json::from_slice(value.value())
                .map_err(|e| SyncError::Serialization(e.to_string()))?;
            entries.push((key.value().to_string(), entry));
        }
        Ok(entries)
    }

    /// Drop every staged entry
    pub fn staging_clear(&self) -> SyncResult<()> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(STAGING_TABLE)?;
            let mut paths = Vec::new();
            for item in table.iter()? {
                let (key, _) = item?;
                paths.push(key.value().to_string());
            }
            for path in paths {
                table.remove(path.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Cell persisted in a [`Storage`] database.
///
/// The CAS runs inside a single redb write transaction, so every process
/// opening the same database observes linearizable swaps.
pub struct StorageCell {
    storage: Storage,
    name: String,
}

impl StorageCell {
    pub fn new(storage: Storage, name: impl Into<String>) -> Self {
        Self {
            storage,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Cell for StorageCell {
    async fn read(&self) -> SyncResult<Vec<u8>> {
        self.storage.read_cell(&self.name)
    }

    async fn compare_and_swap(&self, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome> {
        if next.len() > self.max_size() {
            return Err(SyncError::too_large(next.len(), self.max_size()));
        }
        self.storage.cas_cell(&self.name, prev, next)
    }

    fn max_size(&self) -> usize {
        DEFAULT_MAX_SIZE
    }
}

/// Content-addressed store persisted in a [`Storage`] database, one per role
pub struct StorageStore {
    storage: Storage,
    role: StoreRole,
}

impl StorageStore {
    pub fn new(storage: Storage, role: StoreRole) -> Self {
        Self { storage, role }
    }
}

#[async_trait]
impl Store for StorageStore {
    async fn post(&self, data: &[u8]) -> SyncResult<ObjectId> {
        self.storage.post_object(self.role, data)
    }

    async fn get(&self, id: &ObjectId) -> SyncResult<Vec<u8>> {
        self.storage.get_object(self.role, id)
    }

    async fn exists(&self, id: &ObjectId) -> SyncResult<bool> {
        self.storage.object_exists(self.role, id)
    }

    async fn delete(&self, id: &ObjectId) -> SyncResult<()> {
        self.storage.delete_object(self.role, id)
    }

    async fn list(&self) -> SyncResult<Vec<ObjectId>> {
        self.storage.list_objects(self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    fn record() -> BranchRecord {
        BranchRecord {
            salt: vec![1, 2, 3],
            annotations: BTreeMap::new(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        assert!(Storage::new(&db_path).is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_create_and_load_branch_record() {
        let (storage, _temp) = create_test_storage();
        storage.create_branch_record("master", &record()).unwrap();

        let loaded = storage.load_branch_record("master").unwrap().unwrap();
        assert_eq!(loaded, record());
        assert!(storage.load_branch_record("other").unwrap().is_none());
    }

    #[test]
    fn test_create_duplicate_branch_fails() {
        let (storage, _temp) = create_test_storage();
        storage.create_branch_record("master", &record()).unwrap();
        let err = storage.create_branch_record("master", &record()).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));
    }

    #[test]
    fn test_delete_branch_record() {
        let (storage, _temp) = create_test_storage();
        storage.create_branch_record("master", &record()).unwrap();
        storage.delete_branch_record("master").unwrap();
        assert!(storage.load_branch_record("master").unwrap().is_none());
        assert!(storage.delete_branch_record("master").unwrap_err().is_not_exist());
    }

    #[test]
    fn test_list_branch_names_span() {
        let (storage, _temp) = create_test_storage();
        for name in ["a", "b", "c", "d"] {
            storage.create_branch_record(name, &record()).unwrap();
        }
        assert_eq!(storage.list_branch_names("", None).unwrap(), ["a", "b", "c", "d"]);
        assert_eq!(storage.list_branch_names("b", Some("d")).unwrap(), ["b", "c"]);
    }

    #[test]
    fn test_cell_cas_and_read() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.read_cell("master").unwrap().is_empty());

        let outcome = storage.cas_cell("master", b"", b"v1").unwrap();
        assert!(outcome.swapped);

        let outcome = storage.cas_cell("master", b"stale", b"v2").unwrap();
        assert!(!outcome.swapped);
        assert_eq!(outcome.current, b"v1");
        assert_eq!(storage.read_cell("master").unwrap(), b"v1");
    }

    #[test]
    fn test_objects_roundtrip_per_role() {
        let (storage, _temp) = create_test_storage();
        let id = storage.post_object(StoreRole::Raw, b"raw bytes").unwrap();

        assert_eq!(storage.get_object(StoreRole::Raw, &id).unwrap(), b"raw bytes");
        // Role namespaces are disjoint.
        assert!(!storage.object_exists(StoreRole::Vc, &id).unwrap());
        assert_eq!(storage.list_objects(StoreRole::Raw).unwrap(), vec![id]);
        assert!(storage.list_objects(StoreRole::Fs).unwrap().is_empty());
    }

    #[test]
    fn test_active_branch_pointer() {
        let (storage, _temp) = create_test_storage();
        assert_eq!(storage.get_active_branch().unwrap(), "");
        storage.set_active_branch("feature").unwrap();
        assert_eq!(storage.get_active_branch().unwrap(), "feature");
    }

    #[test]
    fn test_staging_roundtrip() {
        let (storage, _temp) = create_test_storage();
        assert!(storage.staging_is_empty().unwrap());

        let entry = StagedEntry {
            id: ObjectId::for_bytes(b"data"),
            size: 4,
        };
        storage.staging_put("myfile.txt", &entry).unwrap();
        assert!(!storage.staging_is_empty().unwrap());

        let listed = storage.staging_list().unwrap();
        assert_eq!(listed, vec![("myfile.txt".to_string(), entry)]);

        storage.staging_clear().unwrap();
        assert!(storage.staging_is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_storage_cell_trait_impl() {
        let (storage, _temp) = create_test_storage();
        let cell = StorageCell::new(storage, "master");

        let outcome = cell.compare_and_swap(b"", b"head").await.unwrap();
        assert!(outcome.swapped);
        assert_eq!(cell.read().await.unwrap(), b"head");
    }

    #[tokio::test]
    async fn test_storage_store_trait_impl() {
        let (storage, _temp) = create_test_storage();
        let store = StorageStore::new(storage, StoreRole::Vc);

        let id = store.post(b"snapshot").await.unwrap();
        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap(), b"snapshot");
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        {
            let storage = Storage::new(&db_path).unwrap();
            storage.create_branch_record("master", &record()).unwrap();
            storage.cas_cell("master", b"", b"head").unwrap();
            storage.set_active_branch("master").unwrap();
        }
        {
            let storage = Storage::new(&db_path).unwrap();
            assert!(storage.load_branch_record("master").unwrap().is_some());
            assert_eq!(storage.read_cell("master").unwrap(), b"head");
            assert_eq!(storage.get_active_branch().unwrap(), "master");
        }
    }
}
