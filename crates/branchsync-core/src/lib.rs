//! branchsync core library
//!
//! Synchronization core for distributed, content-addressed version control.
//! Repositories expose named mutable branch pointers ("branches") over an
//! authenticated peer transport; other repositories mount those collections
//! ("spaces") under name prefixes and merge object graphs with a
//! compare-and-swap head update.
//!
//! ## Overview
//!
//! - A **cell** is an atomically compare-and-swap-able pointer holding a
//!   branch's current head; every head mutation is one retried transform.
//! - A **volume** is a cell plus three content-addressed stores (snapshots,
//!   file trees, raw bytes); a **branch** adds salt and metadata.
//! - A **space** is a namespace of branches: in-memory, redb-persisted,
//!   prefix-routed, encrypting, or projected from a remote peer.
//! - The **net** layer serves a space over the ask primitive (one request,
//!   one bounded response, per-request deadline) and consumes a peer's space
//!   behind the same trait.
//! - A **repo** composes all of it with staging, commits, fork, sync, and
//!   history.
//!
//! ## Quick start
//!
//! ```ignore
//! use branchsync_core::Repo;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Repo::init("~/.branchsync/repo").await?;
//!
//!     repo.add("myfile.txt", b"hello world\n").await?;
//!     repo.commit("initial commit").await?;
//!
//!     repo.fork("master", "feature").await?;
//!     for entry in repo.ls("").await? {
//!         println!("{} ({} bytes)", entry.name, entry.size);
//!     }
//!     Ok(())
//! }
//! ```

pub mod branch;
pub mod cell;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod net;
pub mod repo;
pub mod space;
pub mod storage;
pub mod store;
pub mod types;
pub mod vc;

// Re-exports
pub use branch::{Branch, Params, Volume};
pub use cell::{apply, Cell, CasOutcome, EncryptedCell, MemCell};
pub use config::{RepoConfig, SpaceLayerSpec, SpaceSpec};
pub use crypto::SpaceCrypto;
pub use error::{SyncError, SyncResult};
pub use net::{
    AskTransport, IrohTransport, MemNetwork, PeerAddr, RemoteSpace, SpaceServer,
};
pub use repo::{Repo, DEFAULT_BRANCH};
pub use space::{CryptoSpace, LayeredSpace, LocalSpace, MemSpace, Space, Span};
pub use store::{MemStore, Store};
pub use types::{ObjectId, PeerId, StoreRole};
pub use vc::Snapshot;
