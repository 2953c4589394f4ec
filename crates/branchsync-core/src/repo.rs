//! Repository orchestration
//!
//! A repository owns one redb database (branch records, heads, objects,
//! staging, the active-branch pointer), a composed space (local layer plus
//! configured remote/crypto mounts), and the operations a working copy
//! needs: branch CRUD, active-branch switching, fork, volume sync, history,
//! and the stage/commit/read cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use rand::RngCore;
use tracing::{debug, info};

use crate::branch::{
    decode_head, encode_head, get_head, history as branch_history, set_head, sync_volumes, Branch,
    Params,
};
use crate::cell::apply_async;
use crate::config::{build_space, RepoConfig};
use crate::error::{SyncError, SyncResult};
use crate::fs::{self, TreeEntry};
use crate::net::{AskTransport, IrohTransport};
use crate::space::{LocalSpace, Space, Span, Visit};
use crate::storage::{StagedEntry, Storage};
use crate::store::Store;
use crate::types::ObjectId;
use crate::vc::{self, Snapshot};

/// Branch the empty active-branch pointer resolves to
pub const DEFAULT_BRANCH: &str = "master";

const DB_FILE: &str = "branchsync.redb";
const CONFIG_FILE: &str = "config.json";

/// One repository instance
pub struct Repo {
    data_dir: PathBuf,
    storage: Storage,
    config: RepoConfig,
    local: Arc<dyn Space>,
    space: Arc<dyn Space>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("data_dir", &self.data_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Repo {
    /// Initialize a new repository at `path`.
    ///
    /// Creates the database, a default config, and the default branch.
    pub async fn init(path: impl AsRef<Path>) -> SyncResult<Repo> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        if data_dir.join(CONFIG_FILE).exists() {
            return Err(SyncError::AlreadyExists(format!(
                "repository at {}",
                data_dir.display()
            )));
        }
        RepoConfig::default().save(&data_dir)?;

        let repo = Self::open(&data_dir).await?;
        repo.local.create(DEFAULT_BRANCH, Params::default()).await?;
        info!(data_dir = %repo.data_dir.display(), "initialized repository");
        Ok(repo)
    }

    /// Open a repository without network access.
    ///
    /// Fails if the config mounts peer spaces; use
    /// [`Repo::open_with_transport`] for those.
    pub async fn open(path: impl AsRef<Path>) -> SyncResult<Repo> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Open a repository whose config may mount remote peers
    pub async fn open_with_transport(
        path: impl AsRef<Path>,
        transport: Arc<dyn AskTransport>,
    ) -> SyncResult<Repo> {
        Self::open_inner(path.as_ref(), Some(transport))
    }

    /// Open a repository and bind its iroh transport.
    ///
    /// The transport serves the local space to peers and backs any peer
    /// mounts in the config; known peer addresses from the config are
    /// registered for static discovery. The endpoint reuses the persisted
    /// secret so the peer identity stays stable across restarts.
    pub async fn open_networked(
        path: impl AsRef<Path>,
    ) -> SyncResult<(Repo, Arc<IrohTransport>)> {
        let data_dir = path.as_ref().to_path_buf();
        if !data_dir.join(CONFIG_FILE).exists() {
            return Err(SyncError::NotExist(format!(
                "repository at {}",
                data_dir.display()
            )));
        }
        let config = RepoConfig::load(&data_dir)?;
        let storage = Storage::new(data_dir.join(DB_FILE))?;
        let local: Arc<dyn Space> = Arc::new(LocalSpace::new(storage.clone()));

        let secret = match storage.load_endpoint_secret()? {
            Some(secret) => secret,
            None => {
                let mut secret = [0u8; 32];
                rand::rng().fill_bytes(&mut secret);
                storage.save_endpoint_secret(&secret)?;
                secret
            }
        };
        let secret_key = iroh::SecretKey::from_bytes(&secret);

        let transport = Arc::new(
            IrohTransport::bind(Some(secret_key), crate::net::open_all(local.clone())).await?,
        );
        for peer_addr in &config.peers {
            transport.add_peer_addr(peer_addr)?;
        }

        let ask: Arc<dyn AskTransport> = transport.clone();
        let space = build_space(&config, local.clone(), Some(&ask))?;
        Ok((
            Repo {
                data_dir,
                storage,
                config,
                local,
                space,
            },
            transport,
        ))
    }

    fn open_inner(path: &Path, transport: Option<Arc<dyn AskTransport>>) -> SyncResult<Repo> {
        let data_dir = path.to_path_buf();
        if !data_dir.join(CONFIG_FILE).exists() {
            return Err(SyncError::NotExist(format!(
                "repository at {}",
                data_dir.display()
            )));
        }
        let config = RepoConfig::load(&data_dir)?;
        let storage = Storage::new(data_dir.join(DB_FILE))?;
        let local: Arc<dyn Space> = Arc::new(LocalSpace::new(storage.clone()));
        let space = build_space(&config, local.clone(), transport.as_ref())?;
        Ok(Repo {
            data_dir,
            storage,
            config,
            local,
            space,
        })
    }

    /// The repository's directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The loaded configuration
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// The composed space (local layer plus configured mounts)
    pub fn space(&self) -> Arc<dyn Space> {
        self.space.clone()
    }

    /// The local space only; this is what gets served to peers
    pub fn local_space(&self) -> Arc<dyn Space> {
        self.local.clone()
    }

    /// Transport secret, generated and persisted on first use so the
    /// repository keeps a stable peer identity across restarts
    pub fn endpoint_secret(&self) -> SyncResult<[u8; 32]> {
        if let Some(secret) = self.storage.load_endpoint_secret()? {
            return Ok(secret);
        }
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        self.storage.save_endpoint_secret(&secret)?;
        Ok(secret)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Branches
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a branch
    pub async fn create_branch(&self, name: &str, params: Params) -> SyncResult<Branch> {
        self.space.create(name, params).await
    }

    /// Delete a branch
    pub async fn delete_branch(&self, name: &str) -> SyncResult<()> {
        self.space.delete(name).await
    }

    /// Resolve a branch; the empty name resolves to the active branch
    pub async fn get_branch(&self, name: &str) -> SyncResult<Branch> {
        if name.is_empty() {
            let (_, branch) = self.get_active_branch().await?;
            return Ok(branch);
        }
        self.space.get(name).await
    }

    /// Visit every branch name, ascending
    pub async fn for_each_branch(&self, visit: Visit<'_>) -> SyncResult<()> {
        self.space.for_each(Span::all(), visit).await
    }

    /// The active branch's name and branch
    pub async fn get_active_branch(&self) -> SyncResult<(String, Branch)> {
        let mut name = self.storage.get_active_branch()?;
        if name.is_empty() {
            name = DEFAULT_BRANCH.to_string();
        }
        let branch = self.space.get(&name).await?;
        Ok((name, branch))
    }

    /// Switch the active branch.
    ///
    /// With staged changes pending, the target's salt must equal the current
    /// branch's salt: staged content stays valid inside one derivation
    /// domain, and only there.
    pub async fn set_active_branch(&self, name: &str) -> SyncResult<()> {
        let branch = self.get_branch(name).await?;
        if !self.storage.staging_is_empty()? {
            let (_, current) = self.get_active_branch().await?;
            if branch.salt != current.salt {
                return Err(SyncError::SaltMismatch);
            }
        }
        self.storage.set_active_branch(name)?;
        info!(branch = name, "switched active branch");
        Ok(())
    }

    /// Create `next` with `base`'s salt, sync its volume from `base`
    /// (non-forced), and switch to it
    pub async fn fork(&self, base: &str, next: &str) -> SyncResult<()> {
        let base_branch = self.get_branch(base).await?;
        let next_branch = self
            .create_branch(
                next,
                Params {
                    salt: base_branch.salt.clone(),
                    ..Default::default()
                },
            )
            .await?;
        sync_volumes(&next_branch.volume, &base_branch.volume, false).await?;
        self.set_active_branch(next).await
    }

    /// Merge `src`'s volume into `dst`'s and move `dst`'s head.
    ///
    /// Branches must share a salt to be merge-compatible.
    pub async fn sync(&self, src: &str, dst: &str, force: bool) -> SyncResult<()> {
        let src_branch = self.get_branch(src).await?;
        let dst_branch = self.get_branch(dst).await?;
        if src_branch.salt != dst_branch.salt {
            return Err(SyncError::SaltMismatch);
        }
        info!(src, dst, force, "syncing volumes");
        sync_volumes(&dst_branch.volume, &src_branch.volume, force).await
    }

    /// Read a branch's head snapshot, if any
    pub async fn get_branch_head(&self, name: &str) -> SyncResult<Option<(ObjectId, Snapshot)>> {
        let branch = self.get_branch(name).await?;
        match get_head(&branch.volume).await? {
            Some(id) => {
                let snapshot = vc::get_snapshot(branch.volume.vc.as_ref(), &id).await?;
                Ok(Some((id, snapshot)))
            }
            None => Ok(None),
        }
    }

    /// Point a branch's head at an existing snapshot
    pub async fn set_branch_head(&self, name: &str, id: ObjectId) -> SyncResult<()> {
        let branch = self.get_branch(name).await?;
        if !branch.volume.vc.exists(&id).await? {
            return Err(SyncError::NotExist(id.to_string()));
        }
        set_head(&branch.volume, id).await
    }

    /// Walk a branch's snapshot ancestry, newest-first
    pub async fn history<F>(&self, name: &str, visit: F) -> SyncResult<()>
    where
        F: FnMut(ObjectId, &Snapshot) -> SyncResult<()> + Send,
    {
        let branch = self.get_branch(name).await?;
        branch_history(&branch, visit).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Staging and commits
    // ═══════════════════════════════════════════════════════════════════════

    /// Stage a file for the next commit.
    ///
    /// The bytes go straight into the active volume's raw store; only the
    /// pending path-to-blob binding waits for commit.
    pub async fn add(&self, path: &str, data: &[u8]) -> SyncResult<()> {
        let (_, branch) = self.get_active_branch().await?;
        let id = branch.volume.raw.post(data).await?;
        self.storage.staging_put(
            path,
            &StagedEntry {
                id,
                size: data.len() as u64,
            },
        )?;
        debug!(path, size = data.len(), "staged file");
        Ok(())
    }

    /// Whether anything is staged
    pub fn staging_is_empty(&self) -> SyncResult<bool> {
        self.storage.staging_is_empty()
    }

    /// The staged entries, path-ascending
    pub fn status(&self) -> SyncResult<Vec<(String, StagedEntry)>> {
        self.storage.staging_list()
    }

    /// Fold the staged entries into a new snapshot on the active branch.
    ///
    /// The whole head update is one cell transform: if another writer moved
    /// the head mid-commit, the transform re-runs and rebases the staged
    /// entries onto the fresh parent. Staging clears only after the swap
    /// commits.
    pub async fn commit(&self, message: impl Into<String>) -> SyncResult<()> {
        let staged = self.storage.staging_list()?;
        if staged.is_empty() {
            return Err(SyncError::InvalidOperation(
                "staging is empty, nothing to commit".to_string(),
            ));
        }
        let (name, branch) = self.get_active_branch().await?;
        let volume = &branch.volume;
        let message = message.into();
        let created_at = chrono::Utc::now().timestamp();
        let staged = &staged;
        let message = &message;

        apply_async(volume.cell.as_ref(), move |cur| {
            async move {
                let parent = decode_head(&cur)?;
                let base_root = match parent {
                    Some(p) => vc::get_snapshot(volume.vc.as_ref(), &p).await?.root,
                    None => fs::empty_root(volume.fs.as_ref()).await?,
                };
                let mut tree = fs::get_tree(volume.fs.as_ref(), &base_root).await?;
                for (path, entry) in staged {
                    tree.upsert(TreeEntry {
                        name: path.clone(),
                        id: entry.id,
                        size: entry.size,
                    });
                }
                let root = fs::post_tree(volume.fs.as_ref(), &tree).await?;
                let snapshot = Snapshot {
                    parent,
                    root,
                    created_at,
                    message: message.clone(),
                };
                let id = vc::post_snapshot(volume.vc.as_ref(), &snapshot).await?;
                encode_head(&id)
            }
            .boxed()
        })
        .await?;

        self.storage.staging_clear()?;
        info!(branch = %name, files = staged.len(), "committed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // File access
    // ═══════════════════════════════════════════════════════════════════════

    /// Read a file from a branch's head snapshot
    pub async fn cat(&self, branch: &str, path: &str) -> SyncResult<Vec<u8>> {
        let branch = self.get_branch(branch).await?;
        let head = get_head(&branch.volume)
            .await?
            .ok_or_else(|| SyncError::NotExist(path.to_string()))?;
        let snapshot = vc::get_snapshot(branch.volume.vc.as_ref(), &head).await?;
        fs::read_file(
            branch.volume.fs.as_ref(),
            branch.volume.raw.as_ref(),
            &snapshot.root,
            path,
        )
        .await
    }

    /// List the files at a branch's head snapshot
    pub async fn ls(&self, branch: &str) -> SyncResult<Vec<TreeEntry>> {
        let branch = self.get_branch(branch).await?;
        match get_head(&branch.volume).await? {
            Some(head) => {
                let snapshot = vc::get_snapshot(branch.volume.vc.as_ref(), &head).await?;
                fs::list(branch.volume.fs.as_ref(), &snapshot.root).await
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_repo() -> (Repo, TempDir) {
        let temp = TempDir::new().unwrap();
        let repo = Repo::init(temp.path().join("repo")).await.unwrap();
        (repo, temp)
    }

    #[tokio::test]
    async fn test_init_creates_default_branch() {
        let (repo, _temp) = test_repo().await;
        let (name, branch) = repo.get_active_branch().await.unwrap();
        assert_eq!(name, DEFAULT_BRANCH);
        assert!(branch.salt.is_empty());
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repo");
        Repo::init(&path).await.unwrap();
        let err = Repo::init(&path).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_open_missing_fails() {
        let temp = TempDir::new().unwrap();
        let err = Repo::open(temp.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn test_empty_name_resolves_active() {
        let (repo, _temp) = test_repo().await;
        repo.create_branch("feature", Params::default())
            .await
            .unwrap();
        repo.set_active_branch("feature").await.unwrap();

        let (name, _) = repo.get_active_branch().await.unwrap();
        assert_eq!(name, "feature");
        // get_branch("") follows the pointer.
        repo.get_branch("").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_commit_cat() {
        let (repo, _temp) = test_repo().await;

        repo.add("myfile.txt", b"hello world\n").await.unwrap();
        assert!(!repo.staging_is_empty().unwrap());

        repo.commit("initial").await.unwrap();
        assert!(repo.staging_is_empty().unwrap());

        let data = repo.cat("", "myfile.txt").await.unwrap();
        assert_eq!(data, b"hello world\n");

        let entries = repo.ls("").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "myfile.txt");
        assert_eq!(entries[0].size, 12);
    }

    #[tokio::test]
    async fn test_commit_empty_staging_fails() {
        let (repo, _temp) = test_repo().await;
        assert!(repo.commit("nothing").await.is_err());
    }

    #[tokio::test]
    async fn test_commit_chains_parents() {
        let (repo, _temp) = test_repo().await;

        repo.add("a.txt", b"one").await.unwrap();
        repo.commit("first").await.unwrap();
        repo.add("b.txt", b"two").await.unwrap();
        repo.commit("second").await.unwrap();

        let mut messages = Vec::new();
        repo.history("", |_, snap| {
            messages.push(snap.message.clone());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(messages, ["second", "first"]);

        // Both files are visible at the second snapshot.
        assert_eq!(repo.cat("", "a.txt").await.unwrap(), b"one");
        assert_eq!(repo.cat("", "b.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_switch_with_staging_requires_equal_salt() {
        let (repo, _temp) = test_repo().await;
        repo.create_branch("samesalt", Params::default())
            .await
            .unwrap();
        repo.create_branch(
            "othersalt",
            Params {
                salt: vec![1, 2, 3],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        repo.add("pending.txt", b"pending").await.unwrap();

        // Different salt: blocked while staging is non-empty.
        let err = repo.set_active_branch("othersalt").await.unwrap_err();
        assert!(matches!(err, SyncError::SaltMismatch));

        // Equal salt: allowed, staging preserved.
        repo.set_active_branch("samesalt").await.unwrap();
        assert!(!repo.staging_is_empty().unwrap());

        // Once staging is empty the switch is unrestricted.
        repo.commit("flush").await.unwrap();
        repo.set_active_branch("othersalt").await.unwrap();
    }

    #[tokio::test]
    async fn test_fork_copies_history_and_switches() {
        let (repo, _temp) = test_repo().await;
        repo.add("myfile.txt", b"content").await.unwrap();
        repo.commit("base commit").await.unwrap();

        repo.fork("master", "feature").await.unwrap();

        let (name, _) = repo.get_active_branch().await.unwrap();
        assert_eq!(name, "feature");

        let mut master_history = Vec::new();
        repo.history("master", |id, _| {
            master_history.push(id);
            Ok(())
        })
        .await
        .unwrap();

        let mut feature_history = Vec::new();
        repo.history("feature", |id, _| {
            feature_history.push(id);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(master_history, feature_history);
        assert!(!master_history.is_empty());
    }

    #[tokio::test]
    async fn test_sync_between_local_branches() {
        let (repo, _temp) = test_repo().await;
        repo.add("f.txt", b"data").await.unwrap();
        repo.commit("on master").await.unwrap();

        repo.create_branch("mirror", Params::default())
            .await
            .unwrap();
        repo.sync("master", "mirror", false).await.unwrap();

        assert_eq!(repo.cat("mirror", "f.txt").await.unwrap(), b"data");

        // Repeating the sync is a no-op.
        repo.sync("master", "mirror", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_rejects_salt_mismatch() {
        let (repo, _temp) = test_repo().await;
        repo.create_branch(
            "salted",
            Params {
                salt: vec![7],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = repo.sync("master", "salted", false).await.unwrap_err();
        assert!(matches!(err, SyncError::SaltMismatch));
    }

    #[tokio::test]
    async fn test_set_branch_head_requires_known_snapshot() {
        let (repo, _temp) = test_repo().await;
        let err = repo
            .set_branch_head("master", ObjectId::for_bytes(b"unknown"))
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }

    #[tokio::test]
    async fn test_get_branch_head() {
        let (repo, _temp) = test_repo().await;
        assert!(repo.get_branch_head("master").await.unwrap().is_none());

        repo.add("f.txt", b"x").await.unwrap();
        repo.commit("head commit").await.unwrap();

        let (_, snapshot) = repo.get_branch_head("master").await.unwrap().unwrap();
        assert_eq!(snapshot.message, "head commit");
    }

    #[tokio::test]
    async fn test_endpoint_secret_is_stable() {
        let (repo, _temp) = test_repo().await;
        let a = repo.endpoint_secret().unwrap();
        let b = repo.endpoint_secret().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_delete_branch() {
        let (repo, _temp) = test_repo().await;
        repo.create_branch("doomed", Params::default())
            .await
            .unwrap();
        repo.delete_branch("doomed").await.unwrap();
        assert!(repo.get_branch("doomed").await.unwrap_err().is_not_exist());
    }
}
