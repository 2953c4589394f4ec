//! Space service: serving a local space and consuming a remote one
//!
//! The server dispatches wire requests against the space its `open` hook
//! grants the authenticated requester; every decode or dispatch failure is
//! caught and shipped back as a wire error, so transport failures stay
//! reserved for genuine connectivity problems. The client projects the
//! peer's space behind the regular [`Space`] trait, paginating enumeration
//! and rejecting pages that break the listing contract.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::branch::{Branch, Params, Volume};
use crate::error::{SyncError, SyncResult};
use crate::space::{Space, Span, Visit};
use crate::types::{PeerId, StoreRole};

use super::cell::RemoteCell;
use super::blobs::RemoteStore;
use super::transport::{AskHandler, AskTransport, Service, ASK_TIMEOUT, MAX_RESPONSE_SIZE};
use super::wire::{BranchInfo, SpaceOp, SpaceReq, SpaceRes};
use super::OpenSpace;

/// Page size the client requests during enumeration
pub const LIST_PAGE_SIZE: usize = 100;

/// Serves a local space to remote peers
pub struct SpaceServer {
    open: OpenSpace,
}

impl SpaceServer {
    pub fn new(open: OpenSpace) -> Self {
        Self { open }
    }

    async fn dispatch(&self, from: PeerId, payload: &[u8]) -> SyncResult<SpaceRes> {
        let req = SpaceReq::decode(payload)?;
        debug!(op = ?req.op, name = %req.name, peer = %from, "space request");
        let space = (self.open)(from);
        match req.op {
            SpaceOp::Create => {
                let params: Params = req.params.unwrap_or_default().into();
                let branch = space.create(&req.name, params).await?;
                Ok(SpaceRes {
                    info: Some(BranchInfo::from_branch(&branch)),
                    ..Default::default()
                })
            }
            SpaceOp::Delete => {
                space.delete(&req.name).await?;
                Ok(SpaceRes::default())
            }
            SpaceOp::Get => {
                let branch = space.get(&req.name).await?;
                Ok(SpaceRes {
                    info: Some(BranchInfo::from_branch(&branch)),
                    ..Default::default()
                })
            }
            SpaceOp::Exists => {
                let exists = space.exists(&req.name).await?;
                Ok(SpaceRes {
                    exists: Some(exists),
                    ..Default::default()
                })
            }
            SpaceOp::List => {
                let limit = req.limit.unwrap_or(LIST_PAGE_SIZE);
                let mut names: Vec<String> = Vec::new();
                space
                    .for_each(Span::from(req.name.clone()), &mut |name| {
                        if names.len() < limit {
                            names.push(name.to_string());
                        }
                        Ok(())
                    })
                    .await?;
                names.sort();
                Ok(SpaceRes {
                    names: Some(names),
                    ..Default::default()
                })
            }
        }
    }
}

#[async_trait]
impl AskHandler for SpaceServer {
    async fn handle_ask(&self, from: PeerId, payload: &[u8]) -> Vec<u8> {
        let res = match tokio::time::timeout(ASK_TIMEOUT, self.dispatch(from, payload)).await {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => {
                warn!(peer = %from, %err, "space request failed");
                SpaceRes::from_error(&err)
            }
            Err(_) => {
                error!(peer = %from, "space request timed out");
                SpaceRes::from_error(&SyncError::Transport("request timed out".to_string()))
            }
        };
        let encoded = res.encode().unwrap_or_else(|err| {
            error!(%err, "failed to encode space response");
            SpaceRes::from_error(&err).encode().unwrap_or_default()
        });
        if encoded.len() > MAX_RESPONSE_SIZE {
            return SpaceRes::from_error(&SyncError::Transport(
                "response exceeds transport capacity".to_string(),
            ))
            .encode()
            .unwrap_or_default();
        }
        encoded
    }
}

/// A peer's space, projected over the transport
pub struct RemoteSpace {
    transport: Arc<dyn AskTransport>,
    peer: PeerId,
    page_size: usize,
}

impl RemoteSpace {
    pub fn new(transport: Arc<dyn AskTransport>, peer: PeerId) -> Self {
        Self::with_page_size(transport, peer, LIST_PAGE_SIZE)
    }

    /// Like [`RemoteSpace::new`] with an explicit enumeration page size
    pub fn with_page_size(transport: Arc<dyn AskTransport>, peer: PeerId, page_size: usize) -> Self {
        Self {
            transport,
            peer,
            page_size: page_size.max(1),
        }
    }

    async fn ask(&self, req: &SpaceReq) -> SyncResult<SpaceRes> {
        let payload = req.encode()?;
        let response = self
            .transport
            .ask(self.peer, Service::Space, &payload)
            .await?;
        let res = SpaceRes::decode(&response)?;
        if let Some(wire_err) = res.error {
            return Err(wire_err.into_error());
        }
        Ok(res)
    }

    fn make_branch(&self, name: &str, info: BranchInfo) -> Branch {
        let store = |role: StoreRole| -> Arc<dyn crate::store::Store> {
            Arc::new(RemoteStore::new(
                self.transport.clone(),
                self.peer,
                name,
                role,
            ))
        };
        Branch {
            volume: Volume {
                cell: Arc::new(RemoteCell::new(self.transport.clone(), self.peer, name)),
                vc: store(StoreRole::Vc),
                fs: store(StoreRole::Fs),
                raw: store(StoreRole::Raw),
            },
            salt: info.salt,
            annotations: info.annotations,
            created_at: info.created_at,
        }
    }

    /// One page of branch names, all `>= first`, verified strictly ascending.
    ///
    /// A page violating the ordering contract is a protocol error: retrying
    /// cannot fix a non-conforming server, and tolerating it would corrupt
    /// the convergence of a sync.
    pub async fn list(&self, first: &str, limit: usize) -> SyncResult<Vec<String>> {
        let res = self
            .ask(&SpaceReq {
                op: SpaceOp::List,
                name: first.to_string(),
                limit: Some(limit),
                params: None,
            })
            .await?;
        let names = res
            .names
            .ok_or(SyncError::EmptyResponse("branch name listing"))?;
        if !names.windows(2).all(|w| w[0] < w[1]) {
            return Err(SyncError::MalformedResponse(
                "branch names are not strictly sorted".to_string(),
            ));
        }
        if let Some(head) = names.first() {
            if head.as_str() < first {
                return Err(SyncError::MalformedResponse(format!(
                    "bad branch listing: {:?} < {:?}",
                    head, first
                )));
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl Space for RemoteSpace {
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch> {
        let res = self
            .ask(&SpaceReq {
                op: SpaceOp::Create,
                name: name.to_string(),
                limit: None,
                params: Some(params.into()),
            })
            .await?;
        let info = res.info.ok_or(SyncError::EmptyResponse("branch info"))?;
        Ok(self.make_branch(name, info))
    }

    async fn get(&self, name: &str) -> SyncResult<Branch> {
        let res = self
            .ask(&SpaceReq {
                op: SpaceOp::Get,
                name: name.to_string(),
                limit: None,
                params: None,
            })
            .await?;
        let info = res.info.ok_or(SyncError::EmptyResponse("branch info"))?;
        Ok(self.make_branch(name, info))
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        self.ask(&SpaceReq {
            op: SpaceOp::Delete,
            name: name.to_string(),
            limit: None,
            params: None,
        })
        .await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> SyncResult<bool> {
        let res = self
            .ask(&SpaceReq {
                op: SpaceOp::Exists,
                name: name.to_string(),
                limit: None,
                params: None,
            })
            .await?;
        res.exists.ok_or(SyncError::EmptyResponse("exists flag"))
    }

    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()> {
        let mut cursor = span.begin.clone();
        let mut first_page = true;
        loop {
            // Continuation pages ask for one extra entry: the cursor itself
            // comes back at the front, and without the slack a page size of
            // one could never advance past it.
            let limit = if first_page {
                self.page_size
            } else {
                self.page_size + 1
            };
            let names = self.list(&cursor, limit).await?;
            // A page that is empty or stuck on the cursor cannot advance.
            let fresh: Vec<&String> = names
                .iter()
                .filter(|name| first_page || **name != cursor)
                .collect();
            if fresh.is_empty() {
                return Ok(());
            }
            for name in fresh {
                if let Some(end) = &span.end {
                    if name.as_str() >= end.as_str() {
                        return Ok(());
                    }
                }
                visit(name)?;
            }
            cursor = names.last().cloned().unwrap_or_default();
            first_page = false;
        }
    }
}
