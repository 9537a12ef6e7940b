//! The vault service: upload and retrieve state machines over injected
//! dependencies.
//!
//! Upload ordering is the core correctness rule: provisional registry row
//! first, backend put second, finalize third. A blob is never finalized
//! before its ciphertext is confirmed stored, so a crash at any point
//! leaves at worst a visible provisional row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use ghostvault_crypto::codec;
use ghostvault_crypto::keys::KeyManager;
use ghostvault_protocol::blob::{
    now_unix, Blob, BlobState, CipherAlgorithm, EncryptionMetadata,
};
use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::BlobId;
use ghostvault_store::backend::BlobBackend;
use ghostvault_store::registry::BlobRegistry;
use ghostvault_store::retry::RetryPolicy;

/// Upload lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Pending,
    Encrypting,
    Uploading,
    Finalized,
    Failed,
}

/// Retrieval lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievePhase {
    Fetching,
    Decrypting,
    Ready,
    Failed,
}

/// Progress events emitted as operations move through their phases.
///
/// Consumers observe these without blocking the vault; a dropped receiver
/// just means nobody is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    Upload { blob_id: BlobId, phase: UploadPhase },
    Retrieve { blob_id: BlobId, phase: RetrievePhase },
}

/// Tunables for one vault instance.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Bound on concurrently running upload/retrieve/delete operations.
    pub max_concurrent_ops: usize,
    /// Backoff schedule for transient backend failures.
    pub retry: RetryPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ops: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Orchestrates the encrypted-blob lifecycle.
///
/// All dependencies are injected, so multiple isolated vaults (one per
/// wallet session) coexist without cross-talk. Operations on the same blob
/// id are serialized; different ids run concurrently up to the configured
/// bound.
pub struct VaultService {
    registry: Arc<BlobRegistry>,
    keys: Arc<KeyManager>,
    backend: Arc<dyn BlobBackend>,
    retry: RetryPolicy,
    limit: Arc<Semaphore>,
    locks: Mutex<HashMap<BlobId, Arc<tokio::sync::Mutex<()>>>>,
    event_tx: mpsc::UnboundedSender<VaultEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<VaultEvent>>>,
}

impl VaultService {
    pub fn new(
        registry: Arc<BlobRegistry>,
        keys: Arc<KeyManager>,
        backend: Arc<dyn BlobBackend>,
        config: VaultConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            keys,
            backend,
            retry: config.retry,
            limit: Arc::new(Semaphore::new(config.max_concurrent_ops.max(1))),
            locks: Mutex::new(HashMap::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the progress event receiver. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<VaultEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    /// The key manager backing this vault, for sealed keystore export.
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// The registry backing this vault.
    pub fn registry(&self) -> &Arc<BlobRegistry> {
        &self.registry
    }

    fn emit(&self, event: VaultEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_upload(&self, blob_id: BlobId, phase: UploadPhase) {
        tracing::debug!(blob_id = %blob_id, phase = ?phase, "upload phase");
        self.emit(VaultEvent::Upload { blob_id, phase });
    }

    fn emit_retrieve(&self, blob_id: BlobId, phase: RetrievePhase) {
        tracing::debug!(blob_id = %blob_id, phase = ?phase, "retrieve phase");
        self.emit(VaultEvent::Retrieve { blob_id, phase });
    }

    /// Serialize operations per blob id.
    ///
    /// Entries nobody holds anymore are pruned on the way in, so the map
    /// tracks in-flight operations rather than every id ever touched.
    fn lock_for(&self, id: BlobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, VaultError> {
        self.limit
            .acquire()
            .await
            .map_err(|_| VaultError::transient("vault is shutting down"))
    }

    /// Encrypt and upload a file, returning its finalized blob record.
    ///
    /// `Pending -> Encrypting -> Uploading -> Finalized`, or `Failed` from
    /// any step. Cancellation removes the provisional record and
    /// best-effort deletes whatever reached the backend.
    pub async fn upload(
        &self,
        name: &str,
        plaintext: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Blob, VaultError> {
        // Reject bad input before any state transition begins.
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::validation("file name is empty"));
        }
        if plaintext.is_empty() {
            return Err(VaultError::validation("file is empty"));
        }

        let _slot = self.acquire_slot().await?;
        let blob_id = BlobId::generate();
        let id_lock = self.lock_for(blob_id);
        let _guard = id_lock.lock().await;

        self.emit_upload(blob_id, UploadPhase::Pending);
        tracing::info!(blob_id = %blob_id, name, size = plaintext.len(), "upload started");

        if cancel.is_cancelled() {
            self.emit_upload(blob_id, UploadPhase::Failed);
            return Err(VaultError::Cancelled);
        }

        // Pending -> Encrypting: key issued.
        let key = self.keys.issue_key(blob_id);
        self.emit_upload(blob_id, UploadPhase::Encrypting);

        let ciphertext = match codec::encrypt(plaintext, &key) {
            Ok(frame) => frame,
            Err(e) => {
                self.keys.discard_key(blob_id);
                self.emit_upload(blob_id, UploadPhase::Failed);
                return Err(e);
            }
        };

        // Provisional record before the backend call, per the ordering rule.
        let blob = Blob {
            id: blob_id,
            name: name.to_string(),
            content_id: None,
            size: plaintext.len() as u64,
            uploaded_at: now_unix(),
            encryption: EncryptionMetadata {
                algorithm: CipherAlgorithm::ChaCha20Poly1305,
                key_ref: blob_id.to_hex(),
            },
            state: BlobState::Provisional,
        };
        if let Err(e) = self.registry.add_provisional(&blob) {
            self.keys.discard_key(blob_id);
            self.emit_upload(blob_id, UploadPhase::Failed);
            return Err(e);
        }

        // Encrypting -> Uploading: ciphertext ready.
        self.emit_upload(blob_id, UploadPhase::Uploading);

        // Run the put on its own task so a cancelled upload can still learn
        // the content id of whatever landed and delete it.
        let backend = Arc::clone(&self.backend);
        let retry = self.retry.clone();
        let mut put_task = tokio::spawn(async move {
            retry
                .run("backend put", || backend.put(ciphertext.clone()))
                .await
        });

        let put_result = tokio::select! {
            _ = cancel.cancelled() => {
                self.keys.discard_key(blob_id);
                if let Err(e) = self.registry.remove(blob_id) {
                    tracing::warn!(blob_id = %blob_id, error = %e, "failed to remove cancelled upload");
                }

                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    if let Ok(Ok(content_id)) = put_task.await {
                        let _ = backend.delete(&content_id).await;
                    }
                });

                tracing::info!(blob_id = %blob_id, "upload cancelled");
                self.emit_upload(blob_id, UploadPhase::Failed);
                return Err(VaultError::Cancelled);
            }
            res = &mut put_task => {
                res.map_err(|e| VaultError::transient(format!("upload task failed: {e}")))
            }
        };

        let content_id = match put_result {
            Ok(Ok(content_id)) => content_id,
            Ok(Err(e)) | Err(e) => {
                // Keep the row (and key) so the user can retry or purge it.
                if let Err(mark_err) = self.registry.mark_failed(blob_id) {
                    tracing::warn!(blob_id = %blob_id, error = %mark_err, "failed to mark upload failed");
                }
                self.emit_upload(blob_id, UploadPhase::Failed);
                return Err(e);
            }
        };

        // Uploading -> Finalized: backend confirmed, registry updated.
        if let Err(e) = self.registry.finalize(blob_id, &content_id) {
            self.emit_upload(blob_id, UploadPhase::Failed);
            return Err(e);
        }
        self.emit_upload(blob_id, UploadPhase::Finalized);

        tracing::info!(
            blob_id = %blob_id,
            content_id = %content_id,
            size = blob.size,
            "upload finalized"
        );
        self.registry.get(blob_id)
    }

    /// Fetch and decrypt a finalized blob.
    ///
    /// `Fetching -> Decrypting -> Ready`. Authentication failures and
    /// missing objects are terminal; transient backend errors are retried
    /// with backoff before surfacing.
    pub async fn retrieve(
        &self,
        blob_id: BlobId,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, VaultError> {
        let _slot = self.acquire_slot().await?;
        let id_lock = self.lock_for(blob_id);
        let _guard = id_lock.lock().await;

        let blob = self.registry.get(blob_id)?;
        if !blob.is_retrievable() {
            return Err(VaultError::not_found(format!("retrievable blob {blob_id}")));
        }
        let content_id = blob.content_id.ok_or_else(|| VaultError::Registry {
            reason: format!("finalized blob {blob_id} has no content id"),
        })?;

        // Key check up front: registry entries from another device are
        // undecryptable until a sealed keystore is restored.
        let key = self.keys.key_for(blob_id)?;

        self.emit_retrieve(blob_id, RetrievePhase::Fetching);
        let ciphertext = tokio::select! {
            _ = cancel.cancelled() => {
                self.emit_retrieve(blob_id, RetrievePhase::Failed);
                return Err(VaultError::Cancelled);
            }
            res = self.retry.run("backend get", || self.backend.get(&content_id)) => {
                match res {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        self.emit_retrieve(blob_id, RetrievePhase::Failed);
                        return Err(e);
                    }
                }
            }
        };

        self.emit_retrieve(blob_id, RetrievePhase::Decrypting);
        let plaintext = match codec::decrypt(&ciphertext, &key) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.emit_retrieve(blob_id, RetrievePhase::Failed);
                return Err(e);
            }
        };

        self.emit_retrieve(blob_id, RetrievePhase::Ready);
        tracing::info!(blob_id = %blob_id, size = plaintext.len(), "blob retrieved");
        Ok(plaintext)
    }

    /// Remove a blob: registry record, held key, and (best effort) the
    /// backend object.
    pub async fn delete(&self, blob_id: BlobId) -> Result<(), VaultError> {
        let _slot = self.acquire_slot().await?;
        let id_lock = self.lock_for(blob_id);
        let _guard = id_lock.lock().await;

        let blob = self.registry.get(blob_id)?;
        self.registry.remove(blob_id)?;
        self.keys.discard_key(blob_id);

        if let Some(content_id) = blob.content_id {
            if let Err(e) = self.backend.delete(&content_id).await {
                tracing::warn!(
                    blob_id = %blob_id,
                    content_id = %content_id,
                    error = %e,
                    "best-effort backend delete failed"
                );
            }
        }

        tracing::info!(blob_id = %blob_id, "blob deleted");
        Ok(())
    }

    /// Every tracked record, including provisional and failed uploads.
    pub fn list(&self) -> Result<Vec<Blob>, VaultError> {
        self.registry.list()
    }

    /// Records that can actually be fetched and decrypted.
    pub fn list_retrievable(&self) -> Result<Vec<Blob>, VaultError> {
        self.registry.list_retrievable()
    }

    /// Look up one record.
    pub fn get(&self, blob_id: BlobId) -> Result<Blob, VaultError> {
        self.registry.get(blob_id)
    }
}
