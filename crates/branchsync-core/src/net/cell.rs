//! Cell service: branch head access over the transport
//!
//! Lets a peer read and compare-and-swap the head cell of a branch it can
//! see through its granted space. Messages are postcard-encoded; errors
//! reuse the space service's wire error representation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cell::{CasOutcome, Cell, DEFAULT_MAX_SIZE};
use crate::error::{SyncError, SyncResult};
use crate::space::Space;
use crate::types::PeerId;

use super::transport::{AskHandler, AskTransport, Service, ASK_TIMEOUT};
use super::wire::WireError;
use super::OpenSpace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum CellReq {
    /// Read the named branch's head cell
    Read { name: String },
    /// Compare-and-swap the named branch's head cell
    Cas {
        name: String,
        prev: Vec<u8>,
        next: Vec<u8>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CellRes {
    error: Option<WireError>,
    /// Cell value: the read result, or the value after a CAS attempt
    value: Option<Vec<u8>>,
    /// Whether a CAS committed
    swapped: Option<bool>,
}

impl CellRes {
    fn from_error(err: &SyncError) -> Self {
        Self {
            error: Some(WireError::from_error(err)),
            ..Default::default()
        }
    }

    fn encode(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap_or_default()
    }
}

/// Serves branch head cells to remote peers
pub struct CellServer {
    open: OpenSpace,
}

impl CellServer {
    pub fn new(open: OpenSpace) -> Self {
        Self { open }
    }

    async fn dispatch(&self, from: PeerId, payload: &[u8]) -> SyncResult<CellRes> {
        let req: CellReq =
            postcard::from_bytes(payload).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let space = (self.open)(from);
        match req {
            CellReq::Read { name } => {
                debug!(branch = %name, peer = %from, "remote cell read");
                let branch = space.get(&name).await?;
                let value = branch.volume.cell.read().await?;
                Ok(CellRes {
                    value: Some(value),
                    ..Default::default()
                })
            }
            CellReq::Cas { name, prev, next } => {
                debug!(branch = %name, peer = %from, "remote cell cas");
                let branch = space.get(&name).await?;
                let outcome = branch.volume.cell.compare_and_swap(&prev, &next).await?;
                Ok(CellRes {
                    value: Some(outcome.current),
                    swapped: Some(outcome.swapped),
                    ..Default::default()
                })
            }
        }
    }
}

#[async_trait]
impl AskHandler for CellServer {
    async fn handle_ask(&self, from: PeerId, payload: &[u8]) -> Vec<u8> {
        match tokio::time::timeout(ASK_TIMEOUT, self.dispatch(from, payload)).await {
            Ok(Ok(res)) => res.encode(),
            Ok(Err(err)) => {
                warn!(peer = %from, %err, "cell request failed");
                CellRes::from_error(&err).encode()
            }
            Err(_) => CellRes::from_error(&SyncError::Transport(
                "request timed out".to_string(),
            ))
            .encode(),
        }
    }
}

/// A branch head cell living on a remote peer
pub struct RemoteCell {
    transport: Arc<dyn AskTransport>,
    peer: PeerId,
    name: String,
}

impl RemoteCell {
    pub fn new(transport: Arc<dyn AskTransport>, peer: PeerId, name: impl Into<String>) -> Self {
        Self {
            transport,
            peer,
            name: name.into(),
        }
    }

    async fn ask(&self, req: &CellReq) -> SyncResult<CellRes> {
        let payload =
            postcard::to_allocvec(req).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let response = self
            .transport
            .ask(self.peer, Service::Cell, &payload)
            .await?;
        let res: CellRes = postcard::from_bytes(&response)
            .map_err(|e| SyncError::MalformedResponse(format!("bad cell response: {}", e)))?;
        if let Some(wire_err) = res.error {
            return Err(wire_err.into_error());
        }
        Ok(res)
    }
}

#[async_trait]
impl Cell for RemoteCell {
    async fn read(&self) -> SyncResult<Vec<u8>> {
        let res = self
            .ask(&CellReq::Read {
                name: self.name.clone(),
            })
            .await?;
        res.value.ok_or(SyncError::EmptyResponse("cell value"))
    }

    async fn compare_and_swap(&self, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome> {
        let res = self
            .ask(&CellReq::Cas {
                name: self.name.clone(),
                prev: prev.to_vec(),
                next: next.to_vec(),
            })
            .await?;
        Ok(CasOutcome {
            swapped: res.swapped.ok_or(SyncError::EmptyResponse("swap flag"))?,
            current: res.value.ok_or(SyncError::EmptyResponse("cell value"))?,
        })
    }

    fn max_size(&self) -> usize {
        DEFAULT_MAX_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::Params;
    use crate::cell::apply;
    use crate::net::transport::MemNetwork;
    use crate::net::open_all;
    use crate::space::{MemSpace, Space};

    async fn wired_cell() -> (Arc<MemSpace>, RemoteCell) {
        let network = MemNetwork::new();
        let server_id = PeerId::from_bytes([1u8; 32]);

        let space = Arc::new(MemSpace::new());
        space.create("master", Params::default()).await.unwrap();
        network
            .endpoint(server_id)
            .serve(Service::Cell, Arc::new(CellServer::new(open_all(space.clone()))));

        let client = network.endpoint(PeerId::from_bytes([2u8; 32]));
        let cell = RemoteCell::new(Arc::new(client), server_id, "master");
        (space, cell)
    }

    #[tokio::test]
    async fn test_remote_read_and_cas() {
        let (space, cell) = wired_cell().await;

        assert!(cell.read().await.unwrap().is_empty());

        let outcome = cell.compare_and_swap(b"", b"head-1").await.unwrap();
        assert!(outcome.swapped);

        // The swap is visible on the serving side.
        let local = space.get("master").await.unwrap();
        assert_eq!(local.volume.cell.read().await.unwrap(), b"head-1");
    }

    #[tokio::test]
    async fn test_remote_cas_conflict_reports_current() {
        let (space, cell) = wired_cell().await;
        let local = space.get("master").await.unwrap();
        local.volume.cell.compare_and_swap(b"", b"v1").await.unwrap();

        let outcome = cell.compare_and_swap(b"", b"v2").await.unwrap();
        assert!(!outcome.swapped);
        assert_eq!(outcome.current, b"v1");
    }

    #[tokio::test]
    async fn test_apply_works_through_remote_cell() {
        let (_space, cell) = wired_cell().await;
        apply(&cell, |_| Ok(b"applied".to_vec())).await.unwrap();
        assert_eq!(cell.read().await.unwrap(), b"applied");
    }

    #[tokio::test]
    async fn test_missing_branch_is_not_exist() {
        let (space, cell) = wired_cell().await;
        space.delete("master").await.unwrap();
        assert!(cell.read().await.unwrap_err().is_not_exist());
    }
}
