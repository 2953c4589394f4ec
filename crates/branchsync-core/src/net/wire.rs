//! Wire format for the space service
//!
//! JSON objects with fixed field names; this layout is the interoperability
//! contract between peers. Field absence and `null` both mean "not present".
//! At most one of a response's `error` / success fields is populated; a
//! response with none set is success-without-payload (delete).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::branch::{Branch, Params};
use crate::error::{SyncError, SyncResult};

/// Operation selector for a space request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceOp {
    Create,
    Delete,
    Get,
    Exists,
    List,
}

/// Branch creation parameters as they travel on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireParams {
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl From<Params> for WireParams {
    fn from(params: Params) -> Self {
        Self {
            salt: params.salt,
            annotations: params.annotations,
        }
    }
}

impl From<WireParams> for Params {
    fn from(wire: WireParams) -> Self {
        Self {
            salt: wire.salt,
            annotations: wire.annotations,
        }
    }
}

/// Space service request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceReq {
    pub op: SpaceOp,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<WireParams>,
}

/// Space service response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceRes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(rename = "list", default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<BranchInfo>,
}

impl SpaceRes {
    pub fn from_error(err: &SyncError) -> Self {
        Self {
            error: Some(WireError::from_error(err)),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SyncError::MalformedResponse(format!("bad space response: {}", e)))
    }
}

impl SpaceReq {
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::Serialization(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SyncError::Serialization(format!("bad space request: {}", e)))
    }
}

/// Branch metadata carried over the wire.
///
/// Together with store/cell constructors bound to `(peer, name, role)` this
/// is sufficient to reconstruct a [`Branch`] on the requesting side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    #[serde(with = "hex")]
    pub salt: Vec<u8>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub created_at: i64,
}

impl BranchInfo {
    pub fn from_branch(branch: &Branch) -> Self {
        Self {
            salt: branch.salt.clone(),
            annotations: branch.annotations.clone(),
            created_at: branch.created_at,
        }
    }
}

/// Transport-safe error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotExist,
    AlreadyExists,
    TooLarge,
    Contention,
    NotFastForward,
    SaltMismatch,
    Unauthorized,
    Unknown,
}

/// Serialized error: kind plus human-readable message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    /// Map a server-side error to its wire representation
    pub fn from_error(err: &SyncError) -> Self {
        let (code, message) = match err {
            SyncError::NotExist(msg) => (ErrorCode::NotExist, msg.clone()),
            SyncError::AlreadyExists(msg) => (ErrorCode::AlreadyExists, msg.clone()),
            SyncError::TooLarge(msg) => (ErrorCode::TooLarge, msg.clone()),
            SyncError::Contention(msg) => (ErrorCode::Contention, msg.clone()),
            SyncError::NotFastForward => (ErrorCode::NotFastForward, String::new()),
            SyncError::SaltMismatch => (ErrorCode::SaltMismatch, String::new()),
            SyncError::Unauthorized(msg) => (ErrorCode::Unauthorized, msg.clone()),
            other => (ErrorCode::Unknown, other.to_string()),
        };
        Self { code, message }
    }

    /// Reconstruct the equivalent error on the requesting side
    pub fn into_error(self) -> SyncError {
        match self.code {
            ErrorCode::NotExist => SyncError::NotExist(self.message),
            ErrorCode::AlreadyExists => SyncError::AlreadyExists(self.message),
            ErrorCode::TooLarge => SyncError::TooLarge(self.message),
            ErrorCode::Contention => SyncError::Contention(self.message),
            ErrorCode::NotFastForward => SyncError::NotFastForward,
            ErrorCode::SaltMismatch => SyncError::SaltMismatch,
            ErrorCode::Unauthorized => SyncError::Unauthorized(self.message),
            ErrorCode::Unknown => SyncError::Remote(self.message),
        }
    }
}
