//! Repository configuration
//!
//! `config.json` in the repository directory describes how the composed
//! space is layered: remote peers and encrypting wrappers mounted under name
//! prefixes, with the local space as the implicit unprefixed layer.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::net::{AskTransport, PeerAddr, RemoteSpace};
use crate::space::{CryptoSpace, Layer, LayeredSpace, Space};
use crate::types::PeerId;

/// Root of `config.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Mounted spaces, searched in order before the local layer
    #[serde(default)]
    pub spaces: Vec<SpaceLayerSpec>,
    /// Known peer addresses, registered with the transport at open
    #[serde(default)]
    pub peers: Vec<PeerAddr>,
}

/// One mount: a space visible under a name prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceLayerSpec {
    pub prefix: String,
    pub target: SpaceSpec,
}

/// Recipe for building one space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceSpec {
    /// A remote peer's space, projected over the transport
    Peer { peer: PeerId },
    /// An encrypting wrapper around another space
    Crypto {
        inner: Box<SpaceSpec>,
        #[serde(with = "hex")]
        secret: Vec<u8>,
    },
}

impl RepoConfig {
    /// Load from `dir/config.json`; a missing file is the default config
    pub fn load(dir: &Path) -> SyncResult<Self> {
        let path = dir.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(&path)?;
        serde_json::from_slice(&data).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Write to `dir/config.json`
    pub fn save(&self, dir: &Path) -> SyncResult<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        std::fs::write(dir.join("config.json"), data)?;
        Ok(())
    }
}

fn build_spec(
    spec: &SpaceSpec,
    transport: Option<&Arc<dyn AskTransport>>,
) -> SyncResult<Arc<dyn Space>> {
    match spec {
        SpaceSpec::Peer { peer } => {
            let transport = transport.ok_or_else(|| {
                SyncError::InvalidOperation(
                    "config mounts a peer space but no transport is available".to_string(),
                )
            })?;
            Ok(Arc::new(RemoteSpace::new(transport.clone(), *peer)))
        }
        SpaceSpec::Crypto { inner, secret } => {
            let inner = build_spec(inner, transport)?;
            let secret: [u8; 32] = secret.as_slice().try_into().map_err(|_| {
                SyncError::InvalidOperation(format!(
                    "crypto space secret must be 32 bytes, got {}",
                    secret.len()
                ))
            })?;
            Ok(Arc::new(CryptoSpace::new(inner, secret)))
        }
    }
}

/// Compose the repository's space: configured mounts first, local layer last
pub fn build_space(
    config: &RepoConfig,
    local: Arc<dyn Space>,
    transport: Option<&Arc<dyn AskTransport>>,
) -> SyncResult<Arc<dyn Space>> {
    let mut layers = Vec::with_capacity(config.spaces.len() + 1);
    for spec in &config.spaces {
        debug!(prefix = %spec.prefix, "mounting space layer");
        layers.push(Layer {
            prefix: spec.prefix.clone(),
            target: build_spec(&spec.target, transport)?,
        });
    }
    layers.push(Layer {
        prefix: String::new(),
        target: local,
    });
    Ok(Arc::new(LayeredSpace::new(layers)))
}
