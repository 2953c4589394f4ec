//! iroh-backed ask transport
//!
//! One QUIC endpoint serves all three services, each under its own ALPN.
//! Every inbound connection is one ask: the router hands the connection to
//! the protocol handler on its own task, the handler reads the request from
//! a bi-directional stream, dispatches against the registered
//! [`AskHandler`], and writes the bounded response back. The requesting
//! peer's identity is the connection's authenticated endpoint key; payloads
//! never carry it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use iroh::discovery::static_provider::StaticProvider;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, EndpointAddr, PublicKey, RelayUrl, SecretKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::types::PeerId;

use super::blobs::BlobServer;
use super::cell::CellServer;
use super::space::SpaceServer;
use super::transport::{AskHandler, AskTransport, Service, ASK_TIMEOUT, MAX_ASK_SIZE, MAX_RESPONSE_SIZE};
use super::OpenSpace;

/// ALPN for the space service
pub const SPACE_ALPN: &[u8] = b"/branchsync/space/1";

/// ALPN for the cell service
pub const CELL_ALPN: &[u8] = b"/branchsync/cell/1";

/// ALPN for the blob service
pub const BLOB_ALPN: &[u8] = b"/branchsync/blob/1";

fn service_alpn(service: Service) -> &'static [u8] {
    match service {
        Service::Space => SPACE_ALPN,
        Service::Cell => CELL_ALPN,
        Service::Blob => BLOB_ALPN,
    }
}

/// Serializable peer address for configs and out-of-band exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// The peer's 32-byte endpoint public key
    pub peer: PeerId,
    /// Home relay, if known
    pub relay_url: Option<String>,
    /// Direct socket addresses, if known
    pub direct_addresses: Vec<String>,
}

impl PeerAddr {
    /// Capture an endpoint's current address
    pub fn from_endpoint_addr(addr: &EndpointAddr) -> Self {
        Self {
            peer: PeerId::from_bytes(*addr.id.as_bytes()),
            relay_url: addr.relay_urls().next().map(|url| url.to_string()),
            direct_addresses: addr.ip_addrs().map(|a| a.to_string()).collect(),
        }
    }

    /// Rebuild the iroh address
    pub fn to_endpoint_addr(&self) -> SyncResult<EndpointAddr> {
        let public_key = PublicKey::from_bytes(self.peer.as_bytes())
            .map_err(|e| SyncError::Transport(format!("invalid peer key: {}", e)))?;
        let mut addr = EndpointAddr::new(public_key);
        if let Some(ref relay) = self.relay_url {
            let relay_url: RelayUrl = relay
                .parse()
                .map_err(|e| SyncError::Transport(format!("invalid relay url: {}", e)))?;
            addr = addr.with_relay_url(relay_url);
        }
        for addr_str in &self.direct_addresses {
            let socket_addr: SocketAddr = addr_str
                .parse()
                .map_err(|e| SyncError::Transport(format!("invalid socket address: {}", e)))?;
            addr = addr.with_ip_addr(socket_addr);
        }
        Ok(addr)
    }
}

/// Bridges one ask service onto an iroh ALPN
#[derive(Clone)]
struct AskProtocolHandler {
    handler: Arc<dyn AskHandler>,
}

impl std::fmt::Debug for AskProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AskProtocolHandler").finish()
    }
}

impl AskProtocolHandler {
    fn new(handler: Arc<dyn AskHandler>) -> Self {
        Self { handler }
    }

    async fn handle_connection(
        connection: Connection,
        handler: Arc<dyn AskHandler>,
    ) -> Result<(), SyncError> {
        let remote_id = connection.remote_id();
        let peer = PeerId::from_bytes(*remote_id.as_bytes());
        debug!(%peer, "handling ask connection");

        let (mut send, mut recv) = connection
            .accept_bi()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to accept bi stream: {}", e)))?;

        let request = recv
            .read_to_end(MAX_ASK_SIZE)
            .await
            .map_err(|e| SyncError::Transport(format!("failed to read request: {}", e)))?;

        // An ask that outlives the deadline is abandoned without a response;
        // the requester observes a transport timeout.
        let response =
            match tokio::time::timeout(ASK_TIMEOUT, handler.handle_ask(peer, &request)).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(%peer, "ask handler timed out, abandoning request");
                    return Ok(());
                }
            };

        send.write_all(&response)
            .await
            .map_err(|e| SyncError::Transport(format!("failed to write response: {}", e)))?;
        send.finish()
            .map_err(|e| SyncError::Transport(format!("failed to finish stream: {}", e)))?;

        // Let the peer drain the stream before the router drops the connection.
        let _ = connection.closed().await;
        Ok(())
    }
}

impl ProtocolHandler for AskProtocolHandler {
    fn accept(
        &self,
        conn: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let handler = self.handler.clone();
        async move {
            if let Err(e) = Self::handle_connection(conn, handler).await {
                warn!(error = ?e, "ask connection failed");
                return Err(AcceptError::from_err(e));
            }
            Ok(())
        }
    }
}

/// Production transport: one iroh endpoint serving and consuming all services
pub struct IrohTransport {
    endpoint: Endpoint,
    #[allow(dead_code)]
    router: Router,
    static_provider: StaticProvider,
}

impl IrohTransport {
    /// Bind an endpoint and register the three service handlers.
    ///
    /// `open` decides which space each authenticated requester may reach.
    /// Pass a stored secret key to keep a stable peer identity across
    /// restarts.
    pub async fn bind(secret_key: Option<SecretKey>, open: OpenSpace) -> SyncResult<Self> {
        let secret_key = secret_key.unwrap_or_else(|| SecretKey::generate(&mut rand::rng()));
        let static_provider = StaticProvider::new();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![
                SPACE_ALPN.to_vec(),
                CELL_ALPN.to_vec(),
                BLOB_ALPN.to_vec(),
            ])
            .discovery(static_provider.clone())
            .bind()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to bind endpoint: {}", e)))?;

        let endpoint_id = endpoint.id();
        info!(%endpoint_id, "endpoint bound");

        let router = Router::builder(endpoint.clone())
            .accept(
                SPACE_ALPN,
                AskProtocolHandler::new(Arc::new(SpaceServer::new(open.clone()))),
            )
            .accept(
                CELL_ALPN,
                AskProtocolHandler::new(Arc::new(CellServer::new(open.clone()))),
            )
            .accept(
                BLOB_ALPN,
                AskProtocolHandler::new(Arc::new(BlobServer::new(open))),
            )
            .spawn();

        Ok(Self {
            endpoint,
            router,
            static_provider,
        })
    }

    /// This endpoint's current address, for out-of-band exchange
    pub fn local_addr(&self) -> PeerAddr {
        PeerAddr::from_endpoint_addr(&self.endpoint.addr())
    }

    /// Make a peer's address known without relying on global discovery
    pub fn add_peer_addr(&self, addr: &PeerAddr) -> SyncResult<()> {
        let endpoint_addr = addr.to_endpoint_addr()?;
        debug!(peer = %addr.peer, "adding peer address to static discovery");
        self.static_provider.add_endpoint_info(endpoint_addr);
        Ok(())
    }
}

#[async_trait]
impl AskTransport for IrohTransport {
    fn local_peer(&self) -> PeerId {
        PeerId::from_bytes(*self.endpoint.id().as_bytes())
    }

    async fn ask(&self, peer: PeerId, service: Service, payload: &[u8]) -> SyncResult<Vec<u8>> {
        if payload.len() > MAX_ASK_SIZE {
            return Err(SyncError::Transport(format!(
                "request of {} bytes exceeds ask bound",
                payload.len()
            )));
        }
        let public_key = PublicKey::from_bytes(peer.as_bytes())
            .map_err(|e| SyncError::Transport(format!("invalid peer key: {}", e)))?;
        let addr = EndpointAddr::new(public_key);

        let exchange = async {
            let connection = self
                .endpoint
                .connect(addr, service_alpn(service))
                .await
                .map_err(|e| SyncError::Transport(format!("failed to connect to {}: {}", peer, e)))?;

            let (mut send, mut recv) = connection
                .open_bi()
                .await
                .map_err(|e| SyncError::Transport(format!("failed to open bi stream: {}", e)))?;

            send.write_all(payload)
                .await
                .map_err(|e| SyncError::Transport(format!("failed to send request: {}", e)))?;
            send.finish()
                .map_err(|e| SyncError::Transport(format!("failed to finish send stream: {}", e)))?;

            recv.read_to_end(MAX_RESPONSE_SIZE)
                .await
                .map_err(|e| SyncError::Transport(format!("failed to read response: {}", e)))
        };

        tokio::time::timeout(ASK_TIMEOUT, exchange)
            .await
            .map_err(|_| SyncError::Transport(format!("ask to {} timed out", peer)))?
    }
}
