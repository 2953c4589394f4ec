//! Spaces: named collections of branches
//!
//! A space is the polymorphic seam of the system. The same five operations
//! run against an in-memory map, a redb database, a prefix router over other
//! spaces, an encrypting wrapper, or a remote peer projected over the wire;
//! repository orchestration never knows which it holds.

use async_trait::async_trait;

use crate::branch::{Branch, Params};
use crate::error::SyncResult;

mod crypto;
mod layered;
mod local;
mod mem;

pub use crypto::CryptoSpace;
pub use layered::{Layer, LayeredSpace};
pub use local::LocalSpace;
pub use mem::MemSpace;

/// Half-open span of branch names, `[begin, end)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Span {
    /// Inclusive lower bound; empty string spans from the start
    pub begin: String,
    /// Exclusive upper bound; `None` spans to the end
    pub end: Option<String>,
}

impl Span {
    /// The span covering every name
    pub fn all() -> Self {
        Self::default()
    }

    /// Span of all names `>= begin`
    pub fn from(begin: impl Into<String>) -> Self {
        Self {
            begin: begin.into(),
            end: None,
        }
    }

    /// Whether `name` lies inside the span
    pub fn contains(&self, name: &str) -> bool {
        if name < self.begin.as_str() {
            return false;
        }
        match &self.end {
            Some(end) => name < end.as_str(),
            None => true,
        }
    }
}

/// Callback for [`Space::for_each`]; returning an error aborts enumeration
pub type Visit<'a> = &'a mut (dyn FnMut(&str) -> SyncResult<()> + Send);

/// A namespace of branches addressable by name
#[async_trait]
pub trait Space: Send + Sync {
    /// Create a branch; `AlreadyExists` when the name is taken
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch>;

    /// Resolve a branch; `NotExist` when absent
    async fn get(&self, name: &str) -> SyncResult<Branch>;

    /// Remove a branch; `NotExist` when absent
    async fn delete(&self, name: &str) -> SyncResult<()>;

    /// Whether the branch exists. Absence is `Ok(false)`; errors are reserved
    /// for transport or permission failures.
    async fn exists(&self, name: &str) -> SyncResult<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_exist() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Enumerate branch names in `span`, strictly ascending, no duplicates
    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()>;
}

/// Collect every name in a span into a vector
pub async fn collect_names(space: &dyn Space, span: Span) -> SyncResult<Vec<String>> {
    let mut names = Vec::new();
    space
        .for_each(span, &mut |name| {
            names.push(name.to_string());
            Ok(())
        })
        .await?;
    Ok(names)
}
