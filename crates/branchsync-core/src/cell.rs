//! Cells: atomically updated, size-bounded pointers
//!
//! A cell holds the current head of a branch. All head mutation anywhere in
//! the system goes through [`apply`], an optimistic compare-and-swap loop,
//! so concurrent writers never lose updates; they just retry their transform
//! against the refreshed value.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::crypto::{SpaceCrypto, NONCE_SIZE, TAG_SIZE};
use crate::error::{SyncError, SyncResult};

/// Default byte bound for cells (64 KiB)
pub const DEFAULT_MAX_SIZE: usize = 1 << 16;

/// Bound on CAS retries before [`apply`] gives up with `Contention`
pub const MAX_CAS_ATTEMPTS: u32 = 10;

/// Result of a single compare-and-swap attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasOutcome {
    /// Whether the swap committed
    pub swapped: bool,
    /// The value now in the cell: `next` on success, the conflicting value otherwise
    pub current: Vec<u8>,
}

/// An atomically compare-and-swap-able pointer to a bounded byte sequence.
///
/// `compare_and_swap` is the only mutating operation. A successful swap is
/// visible to every holder of the same cell identity, including holders in
/// other processes reaching the cell through its backing medium.
#[async_trait]
pub trait Cell: Send + Sync {
    /// Read the current value. An empty value means "nothing pointed to yet".
    async fn read(&self) -> SyncResult<Vec<u8>>;

    /// Atomically replace `prev` with `next`.
    ///
    /// Returns `swapped: false` with the conflicting current value when the
    /// cell no longer holds `prev`. Implementations reject `next` values
    /// over [`Cell::max_size`] with `TooLarge`.
    async fn compare_and_swap(&self, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome>;

    /// Maximum number of bytes this cell will store
    fn max_size(&self) -> usize;
}

/// Apply a pure transform to a cell's value, retrying on contention.
///
/// Reads the current value, computes `transform(current)`, and attempts a
/// compare-and-swap. On conflict the transform is re-run against the fresh
/// value, up to [`MAX_CAS_ATTEMPTS`] times with a short backoff, after which
/// `Contention` is returned. Each attempt is all-or-nothing; cancellation
/// between attempts leaves the cell untouched.
pub async fn apply<F>(cell: &dyn Cell, transform: F) -> SyncResult<()>
where
    F: Fn(&[u8]) -> SyncResult<Vec<u8>> + Send + Sync,
{
    apply_async(cell, |current| {
        let next = transform(&current);
        async move { next }.boxed()
    })
    .await
}

/// [`apply`] for transforms that must await (store reads, rebasing).
///
/// Same retry contract; the transform receives the current value by value
/// and returns a boxed future so it can hold borrows across await points.
pub async fn apply_async<'a, F>(cell: &'a dyn Cell, transform: F) -> SyncResult<()>
where
    F: Fn(Vec<u8>) -> BoxFuture<'a, SyncResult<Vec<u8>>> + Send + Sync + 'a,
{
    let mut current = cell.read().await?;
    for attempt in 0..MAX_CAS_ATTEMPTS {
        let next = transform(current.clone()).await?;
        if next.len() > cell.max_size() {
            return Err(SyncError::too_large(next.len(), cell.max_size()));
        }
        let outcome = cell.compare_and_swap(&current, &next).await?;
        if outcome.swapped {
            return Ok(());
        }
        debug!(attempt, "cell CAS conflict, retrying transform");
        current = outcome.current;
        // Exponential backoff, capped well under the ask timeout.
        let delay = std::time::Duration::from_millis(5u64 << attempt.min(6));
        tokio::time::sleep(delay).await;
    }
    Err(SyncError::contention(MAX_CAS_ATTEMPTS))
}

/// In-process cell backed by a mutex
pub struct MemCell {
    value: Mutex<Vec<u8>>,
    max_size: usize,
}

impl MemCell {
    /// Create an empty cell with the default byte bound
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_SIZE)
    }

    /// Create an empty cell with an explicit byte bound
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            value: Mutex::new(Vec::new()),
            max_size,
        }
    }
}

impl Default for MemCell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cell for MemCell {
    async fn read(&self) -> SyncResult<Vec<u8>> {
        Ok(self.value.lock().clone())
    }

    async fn compare_and_swap(&self, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome> {
        if next.len() > self.max_size {
            return Err(SyncError::too_large(next.len(), self.max_size));
        }
        let mut value = self.value.lock();
        if value.as_slice() == prev {
            *value = next.to_vec();
            Ok(CasOutcome {
                swapped: true,
                current: next.to_vec(),
            })
        } else {
            Ok(CasOutcome {
                swapped: false,
                current: value.clone(),
            })
        }
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Transparent AEAD decorator around another cell.
///
/// Values observed through this cell are plaintext; the inner cell only ever
/// holds ChaCha20-Poly1305 ciphertext. An empty inner value maps to an empty
/// plaintext. Authentication failure surfaces as a `Crypto` error; corrupt
/// ciphertext is never exposed as plaintext.
pub struct EncryptedCell {
    inner: Arc<dyn Cell>,
    crypto: SpaceCrypto,
}

impl EncryptedCell {
    /// Wrap `inner` with a symmetric key shared out of band
    pub fn new(inner: Arc<dyn Cell>, secret: &[u8; 32]) -> Self {
        Self {
            inner,
            crypto: SpaceCrypto::new(secret),
        }
    }

    fn open(&self, ciphertext: &[u8]) -> SyncResult<Vec<u8>> {
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        self.crypto.decrypt(ciphertext)
    }
}

#[async_trait]
impl Cell for EncryptedCell {
    async fn read(&self) -> SyncResult<Vec<u8>> {
        let sealed = self.inner.read().await?;
        self.open(&sealed)
    }

    async fn compare_and_swap(&self, prev: &[u8], next: &[u8]) -> SyncResult<CasOutcome> {
        if next.len() > self.max_size() {
            return Err(SyncError::too_large(next.len(), self.max_size()));
        }
        let sealed_current = self.inner.read().await?;
        let current = self.open(&sealed_current)?;
        if current.as_slice() != prev {
            return Ok(CasOutcome {
                swapped: false,
                current,
            });
        }
        let sealed_next = self.crypto.encrypt(next)?;
        let outcome = self
            .inner
            .compare_and_swap(&sealed_current, &sealed_next)
            .await?;
        if outcome.swapped {
            Ok(CasOutcome {
                swapped: true,
                current: next.to_vec(),
            })
        } else {
            Ok(CasOutcome {
                swapped: false,
                current: self.open(&outcome.current)?,
            })
        }
    }

    fn max_size(&self) -> usize {
        self.inner.max_size().saturating_sub(NONCE_SIZE + TAG_SIZE)
    }
}
