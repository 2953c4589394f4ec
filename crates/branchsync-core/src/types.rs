//! Core identifier types for branchsync

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Content-derived identifier of an object in a store
///
/// Objects are addressed by the BLAKE3-256 hash of their bytes: identical
/// bytes always yield identical ids, which is what makes volume
/// synchronization idempotent and resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(#[serde(with = "hex")] pub [u8; 32]);

impl ObjectId {
    /// Compute the id for a byte sequence
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create an ObjectId from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the id
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        let bytes = hex::decode(s).map_err(|e| SyncError::Serialization(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SyncError::Serialization(format!(
                "expected 32-byte id, got {} bytes",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Identity of a peer on the network
///
/// This is the 32-byte public key of the peer's transport endpoint. The
/// transport authenticates it; request payloads never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create a PeerId from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the PeerId
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to base58 string for display/config
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse from base58 string
    pub fn from_base58(s: &str) -> Result<Self, SyncError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SyncError::Serialization(format!(
                "expected 32-byte peer id, got {} bytes",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer_{}", bs58::encode(&self.0[..8]).into_string())
    }
}

/// Role of a store within a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreRole {
    /// Version-control objects (snapshots)
    Vc,
    /// Filesystem objects (trees)
    Fs,
    /// Raw file bytes
    Raw,
}

impl StoreRole {
    /// Stable short name, used as a storage key prefix and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Vc => "vc",
            StoreRole::Fs => "fs",
            StoreRole::Raw => "raw",
        }
    }

    /// All roles, in volume order
    pub const ALL: [StoreRole; 3] = [StoreRole::Vc, StoreRole::Fs, StoreRole::Raw];
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
