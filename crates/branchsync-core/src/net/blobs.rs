//! Blob service: content-addressed object transfer
//!
//! Moves objects between a branch's stores on two peers. Requests name the
//! branch and store role; the server resolves both through the requester's
//! granted space, so the same authorization seam covers object access.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::space::Space;
use crate::store::Store;
use crate::types::{ObjectId, PeerId, StoreRole};

use super::transport::{AskHandler, AskTransport, Service, ASK_TIMEOUT};
use super::wire::WireError;
use super::OpenSpace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum BlobReq {
    Get {
        name: String,
        role: StoreRole,
        id: ObjectId,
    },
    Post {
        name: String,
        role: StoreRole,
        data: Vec<u8>,
    },
    Exists {
        name: String,
        role: StoreRole,
        id: ObjectId,
    },
    Delete {
        name: String,
        role: StoreRole,
        id: ObjectId,
    },
    List {
        name: String,
        role: StoreRole,
    },
}

impl BlobReq {
    fn target(&self) -> (&str, StoreRole) {
        match self {
            BlobReq::Get { name, role, .. }
            | BlobReq::Post { name, role, .. }
            | BlobReq::Exists { name, role, .. }
            | BlobReq::Delete { name, role, .. }
            | BlobReq::List { name, role } => (name, *role),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct BlobRes {
    error: Option<WireError>,
    data: Option<Vec<u8>>,
    id: Option<ObjectId>,
    exists: Option<bool>,
    ids: Option<Vec<ObjectId>>,
}

impl BlobRes {
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

/// Serves branch object stores to remote peers
pub struct BlobServer {
    open: OpenSpace,
}

impl BlobServer {
    pub fn new(open: OpenSpace) -> Self {
        Self { open }
    }

    async fn dispatch(&self, from: PeerId, payload: &[u8]) -> SyncResult<BlobRes> {
        let req: BlobReq =
            postcard::from_bytes(payload).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let (name, role) = req.target();
        debug!(branch = %name, %role, peer = %from, "blob request");

        let space = (self.open)(from);
        let branch = space.get(name).await?;
        let store = match role {
            StoreRole::Vc => branch.volume.vc,
            StoreRole::Fs => branch.volume.fs,
            StoreRole::Raw => branch.volume.raw,
        };

        match req {
            BlobReq::Get { id, .. } => Ok(BlobRes {
                data: Some(store.get(&id).await?),
                ..Default::default()
            }),
            BlobReq::Post { data, .. } => Ok(BlobRes {
                id: Some(store.post(&data).await?),
                ..Default::default()
            }),
            BlobReq::Exists { id, .. } => Ok(BlobRes {
                exists: Some(store.exists(&id).await?),
                ..Default::default()
            }),
            BlobReq::Delete { id, .. } => {
                store.delete(&id).await?;
                Ok(BlobRes::default())
            }
            BlobReq::List { .. } => Ok(BlobRes {
                ids: Some(store.list().await?),
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl AskHandler for BlobServer {
    async fn handle_ask(&self, from: PeerId, payload: &[u8]) -> Vec<u8> {
        match tokio::time::timeout(ASK_TIMEOUT, self.dispatch(from, payload)).await {
            Ok(Ok(res)) => res.encode(),
            Ok(Err(err)) => {
                warn!(peer = %from, %err, "blob request failed");
                BlobRes::from_error(&err).encode()
            }
            Err(_) => BlobRes::from_error(&SyncError::Transport(
                "request timed out".to_string(),
            ))
            .encode(),
        }
    }
}

/// One store role of a branch living on a remote peer
pub struct RemoteStore {
    transport: Arc<dyn AskTransport>,
    peer: PeerId,
    name: String,
    role: StoreRole,
}

impl RemoteStore {
    pub fn new(
        transport: Arc<dyn AskTransport>,
        peer: PeerId,
        name: impl Into<String>,
        role: StoreRole,
    ) -> Self {
        Self {
            transport,
            peer,
            name: name.into(),
            role,
        }
    }

    async fn ask(&self, req: &BlobReq) -> SyncResult<BlobRes> {
        let payload =
            postcard::to_allocvec(req).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let response = self
            .transport
            .ask(self.peer, Service::Blob, &payload)
            .await?;
        let res: BlobRes = postcard::from_bytes(&response)
            .map_err(|e| SyncError::MalformedResponse(format!("bad blob response: {}", e)))?;
        if let Some(wire_err) = res.error {
            return Err(wire_err.into_error());
        }
        Ok(res)
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn post(&self, data: &[u8]) -> SyncResult<ObjectId> {
        let res = self
            .ask(&BlobReq::Post {
                name: self.name.clone(),
                role: self.role,
                data: data.to_vec(),
            })
            .await?;
        let id = res.id.ok_or(SyncError::EmptyResponse("object id"))?;
        // The returned id must be the content hash of what we sent.
        if id != ObjectId::for_bytes(data) {
            return Err(SyncError::MalformedResponse(format!(
                "peer posted object under foreign id {}",
                id
            )));
        }
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> SyncResult<Vec<u8>> {
        let res = self
            .ask(&BlobReq::Get {
                name: self.name.clone(),
                role: self.role,
                id: *id,
            })
            .await?;
        let data = res.data.ok_or(SyncError::EmptyResponse("object bytes"))?;
        // Verify content addressing before trusting the bytes.
        if ObjectId::for_bytes(&data) != *id {
            return Err(SyncError::MalformedResponse(format!(
                "object {} failed content verification",
                id
            )));
        }
        Ok(data)
    }

    async fn exists(&self, id: &ObjectId) -> SyncResult<bool> {
        let res = self
            .ask(&BlobReq::Exists {
                name: self.name.clone(),
                role: self.role,
                id: *id,
            })
            .await?;
        res.exists.ok_or(SyncError::EmptyResponse("exists flag"))
    }

    async fn delete(&self, id: &ObjectId) -> SyncResult<()> {
        self.ask(&BlobReq::Delete {
            name: self.name.clone(),
            role: self.role,
            id: *id,
        })
        .await?;
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<ObjectId>> {
        let res = self
            .ask(&BlobReq::List {
                name: self.name.clone(),
                role: self.role,
            })
            .await?;
        res.ids.ok_or(SyncError::EmptyResponse("object listing"))
    }
}
