//! Blob backend abstraction and the in-process content-addressed backend.
//!
//! The vault never assumes the backend is fast or reachable: every call is
//! async, failures split into transient (retryable) and not-found
//! (permanent), and `put` is safe to retry because identical bytes always
//! resolve to the same content id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::ContentId;

/// Content-addressable blob storage with `put`/`get` semantics.
///
/// Implementations assign the content id; callers treat it as opaque.
/// `delete` is best effort and must tolerate already-absent objects.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, VaultError>;
    async fn get(&self, content_id: &ContentId) -> Result<Vec<u8>, VaultError>;
    async fn delete(&self, content_id: &ContentId) -> Result<(), VaultError>;
}

/// In-process backend addressing objects by SHA-256 digest.
///
/// Also the test double: transient failures and latency can be injected to
/// exercise the retry, cancellation, and atomicity paths of the vault.
#[derive(Default)]
pub struct MemBackend {
    objects: Mutex<HashMap<ContentId, Vec<u8>>>,
    fail_puts: AtomicU32,
    fail_gets: AtomicU32,
    latency_ms: AtomicU64,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The content id this backend would assign to `bytes`.
    pub fn content_id_for(bytes: &[u8]) -> ContentId {
        let digest = Sha256::digest(bytes);
        ContentId(data_encoding::HEXLOWER.encode(&digest))
    }

    /// Make the next `n` put calls fail with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_puts.store(n, Ordering::Relaxed);
    }

    /// Make the next `n` get calls fail with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.fail_gets.store(n, Ordering::Relaxed);
    }

    /// Add artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether an object is currently stored.
    pub fn contains(&self, content_id: &ContentId) -> bool {
        self.objects.lock().unwrap().contains_key(content_id)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Flip one bit of a stored object in place. Tamper hook for
    /// integrity tests; the content id deliberately goes stale.
    pub fn flip_bit(&self, content_id: &ContentId, byte_idx: usize) {
        if let Some(bytes) = self.objects.lock().unwrap().get_mut(content_id) {
            if let Some(byte) = bytes.get_mut(byte_idx) {
                *byte ^= 1;
            }
        }
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        if counter.load(Ordering::Relaxed) > 0 {
            counter.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl BlobBackend for MemBackend {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, VaultError> {
        self.simulate_latency().await;

        if Self::take_injected_failure(&self.fail_puts) {
            return Err(VaultError::transient("injected put failure"));
        }

        let content_id = Self::content_id_for(&bytes);
        let size = bytes.len();
        let mut objects = self.objects.lock().unwrap();
        // Identical bytes hash to the same id, so a retried put dedupes
        // instead of minting a second identity.
        let deduplicated = objects.insert(content_id.clone(), bytes).is_some();
        drop(objects);

        tracing::debug!(
            content_id = %content_id,
            size,
            deduplicated,
            "stored object"
        );
        Ok(content_id)
    }

    async fn get(&self, content_id: &ContentId) -> Result<Vec<u8>, VaultError> {
        self.simulate_latency().await;

        if Self::take_injected_failure(&self.fail_gets) {
            return Err(VaultError::transient("injected get failure"));
        }

        self.objects
            .lock()
            .unwrap()
            .get(content_id)
            .cloned()
            .ok_or_else(|| VaultError::not_found(format!("object {content_id}")))
    }

    async fn delete(&self, content_id: &ContentId) -> Result<(), VaultError> {
        self.simulate_latency().await;

        if self.objects.lock().unwrap().remove(content_id).is_some() {
            tracing::debug!(content_id = %content_id, "deleted object");
        }
        Ok(())
    }
}
