//! Space wrapper encrypting branch heads
//!
//! Wraps an inner space so every resolved volume's cell is an
//! [`EncryptedCell`]: the inner space (typically a remote peer) stores only
//! ciphertext, while holders of the shared secret see plaintext heads.
//! Branch metadata and object stores pass through untouched; objects are
//! content-addressed under the branch salt's derivation domain.

use std::sync::Arc;

use async_trait::async_trait;

use crate::branch::{Branch, Params};
use crate::cell::EncryptedCell;
use crate::error::SyncResult;

use super::{Space, Span, Visit};

/// Encrypting decorator around another space
pub struct CryptoSpace {
    inner: Arc<dyn Space>,
    secret: [u8; 32],
}

impl CryptoSpace {
    /// Wrap `inner` with a symmetric secret shared out of band
    pub fn new(inner: Arc<dyn Space>, secret: [u8; 32]) -> Self {
        Self { inner, secret }
    }

    fn wrap(&self, mut branch: Branch) -> Branch {
        branch.volume.cell = Arc::new(EncryptedCell::new(branch.volume.cell, &self.secret));
        branch
    }
}

#[async_trait]
impl Space for CryptoSpace {
    async fn create(&self, name: &str, params: Params) -> SyncResult<Branch> {
        Ok(self.wrap(self.inner.create(name, params).await?))
    }

    async fn get(&self, name: &str) -> SyncResult<Branch> {
        Ok(self.wrap(self.inner.get(name).await?))
    }

    async fn delete(&self, name: &str) -> SyncResult<()> {
        self.inner.delete(name).await
    }

    async fn exists(&self, name: &str) -> SyncResult<bool> {
        self.inner.exists(name).await
    }

    async fn for_each(&self, span: Span, visit: Visit<'_>) -> SyncResult<()> {
        self.inner.for_each(span, visit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::{get_head, set_head};
    use crate::cell::Cell;
    use crate::crypto::SpaceCrypto;
    use crate::error::SyncError;
    use crate::space::MemSpace;
    use crate::types::ObjectId;

    #[tokio::test]
    async fn test_heads_are_ciphertext_underneath() {
        let inner = Arc::new(MemSpace::new());
        let secret = SpaceCrypto::generate_key();
        let space = CryptoSpace::new(inner.clone(), secret);

        let branch = space.create("master", Params::default()).await.unwrap();
        let id = ObjectId::for_bytes(b"snap");
        set_head(&branch.volume, id).await.unwrap();

        // Through the wrapper: plaintext head.
        let resolved = space.get("master").await.unwrap();
        assert_eq!(get_head(&resolved.volume).await.unwrap(), Some(id));

        // Through the inner space: opaque bytes that do not decode.
        let raw = inner.get("master").await.unwrap();
        let sealed = raw.volume.cell.read().await.unwrap();
        assert!(!sealed.is_empty());
        assert!(crate::branch::decode_head(&sealed).is_err());
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_closed() {
        let inner = Arc::new(MemSpace::new());
        let writer = CryptoSpace::new(inner.clone(), SpaceCrypto::generate_key());
        let branch = writer.create("master", Params::default()).await.unwrap();
        set_head(&branch.volume, ObjectId::for_bytes(b"snap"))
            .await
            .unwrap();

        let reader = CryptoSpace::new(inner, SpaceCrypto::generate_key());
        let resolved = reader.get("master").await.unwrap();
        assert!(matches!(
            get_head(&resolved.volume).await,
            Err(SyncError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_passes_through() {
        let inner = Arc::new(MemSpace::new());
        let space = CryptoSpace::new(inner, SpaceCrypto::generate_key());
        space.create("a", Params::default()).await.unwrap();
        space.create("b", Params::default()).await.unwrap();

        let names = crate::space::collect_names(&space, Span::all()).await.unwrap();
        assert_eq!(names, ["a", "b"]);
    }
}
