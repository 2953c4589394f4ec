//! Remote branch protocol
//!
//! Projects a peer's local space across the network. One peer serves its
//! space over the "ask" primitive (request in, bounded response out); the
//! other consumes it through [`RemoteSpace`], which implements the same
//! [`Space`](crate::space::Space) trait as a local space. Companion cell and
//! blob services move heads and objects the same way.

mod blobs;
mod cell;
mod iroh;
mod space;
mod transport;
mod wire;

pub use self::blobs::{BlobServer, RemoteStore};
pub use self::cell::{CellServer, RemoteCell};
pub use self::iroh::{IrohTransport, PeerAddr, BLOB_ALPN, CELL_ALPN, SPACE_ALPN};
pub use self::space::{RemoteSpace, SpaceServer};
pub use self::transport::{
    AskHandler, AskTransport, MemNetwork, MemTransport, Service, ASK_TIMEOUT, MAX_ASK_SIZE,
    MAX_RESPONSE_SIZE,
};
pub use self::wire::{BranchInfo, ErrorCode, SpaceOp, SpaceReq, SpaceRes, WireError};

use std::sync::Arc;

use crate::space::Space;
use crate::types::PeerId;

/// Resolves the space a requesting peer is allowed to see.
///
/// This is the authorization seam: the hook runs on the serving side with
/// the transport-authenticated peer identity, before any operation
/// dispatches. A policy engine wraps or replaces the returned space; the
/// simplest deployments return the same space for every peer.
pub type OpenSpace = Arc<dyn Fn(PeerId) -> Arc<dyn Space> + Send + Sync>;

/// An `OpenSpace` granting every peer the same space
pub fn open_all(space: Arc<dyn Space>) -> OpenSpace {
    Arc::new(move |_peer| space.clone())
}
