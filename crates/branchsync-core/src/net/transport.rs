//! The ask primitive: addressed request/response with a deadline
//!
//! A transport ships a request payload to a peer and waits for one bounded
//! response. The peer's identity comes from the transport's authenticated
//! envelope, never from the payload. [`MemNetwork`] wires transports together
//! in process for tests; the iroh transport does the same over QUIC.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{SyncError, SyncResult};
use crate::types::PeerId;

/// Per-ask deadline; a request that outlives it is abandoned
pub const ASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum request payload size (1 MiB object + envelope headroom)
pub const MAX_ASK_SIZE: usize = (1024 + 64) * 1024;

/// Maximum response payload size
pub const MAX_RESPONSE_SIZE: usize = (1024 + 64) * 1024;

/// The services multiplexed over one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Branch namespace operations (create/get/delete/exists/list)
    Space,
    /// Branch head reads and compare-and-swaps
    Cell,
    /// Content-addressed object transfer
    Blob,
}

/// Client side of the ask primitive
#[async_trait]
pub trait AskTransport: Send + Sync {
    /// This endpoint's authenticated identity
    fn local_peer(&self) -> PeerId;

    /// Send `payload` to `peer`'s handler for `service` and await the response.
    ///
    /// Fails with `Transport` on connectivity problems or when the deadline
    /// passes; application-level failures travel inside the response payload.
    async fn ask(&self, peer: PeerId, service: Service, payload: &[u8]) -> SyncResult<Vec<u8>>;
}

/// Server side of the ask primitive
#[async_trait]
pub trait AskHandler: Send + Sync {
    /// Produce the response for one request.
    ///
    /// `from` is the authenticated identity of the requester. Handlers encode
    /// their own application errors into the response; the transport only
    /// reports connectivity failures.
    async fn handle_ask(&self, from: PeerId, payload: &[u8]) -> Vec<u8>;
}

type HandlerMap = HashMap<PeerId, HashMap<Service, Arc<dyn AskHandler>>>;

/// In-process hub connecting [`MemTransport`] endpoints by peer id
#[derive(Clone, Default)]
pub struct MemNetwork {
    handlers: Arc<RwLock<HandlerMap>>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint for `peer` on this network
    pub fn endpoint(&self, peer: PeerId) -> MemTransport {
        MemTransport {
            network: self.clone(),
            local: peer,
        }
    }
}

/// One peer's endpoint on a [`MemNetwork`]
#[derive(Clone)]
pub struct MemTransport {
    network: MemNetwork,
    local: PeerId,
}

impl MemTransport {
    /// Register this endpoint's handler for a service
    pub fn serve(&self, service: Service, handler: Arc<dyn AskHandler>) {
        self.network
            .handlers
            .write()
            .entry(self.local)
            .or_default()
            .insert(service, handler);
    }
}

#[async_trait]
impl AskTransport for MemTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    async fn ask(&self, peer: PeerId, service: Service, payload: &[u8]) -> SyncResult<Vec<u8>> {
        if payload.len() > MAX_ASK_SIZE {
            return Err(SyncError::Transport(format!(
                "request of {} bytes exceeds ask bound",
                payload.len()
            )));
        }
        let handler = self
            .network
            .handlers
            .read()
            .get(&peer)
            .and_then(|services| services.get(&service))
            .cloned()
            .ok_or_else(|| SyncError::Transport(format!("peer {} is not reachable", peer)))?;

        let response = tokio::time::timeout(ASK_TIMEOUT, handler.handle_ask(self.local, payload))
            .await
            .map_err(|_| {
                warn!(%peer, "ask timed out");
                SyncError::Transport(format!("ask to {} timed out", peer))
            })?;

        if response.len() > MAX_RESPONSE_SIZE {
            return Err(SyncError::Transport(format!(
                "response of {} bytes exceeds response bound",
                response.len()
            )));
        }
        Ok(response)
    }
}
