//! Collaborator seams: the wallet session gate and the inference engine.
//!
//! The vault is a pure producer of plaintext for the inference boundary.
//! It never inspects wallet internals or model internals; the wallet is a
//! precondition gate plus the source of the keystore-wrapping secret.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ghostvault_crypto::keystore;
use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::BlobId;

use crate::service::VaultService;

/// Opaque wallet session handle.
pub trait WalletSession: Send + Sync {
    /// Whether the user's wallet is currently connected.
    fn is_connected(&self) -> bool;

    /// 32-byte session secret, used only to derive the keystore master key.
    fn session_secret(&self) -> [u8; 32];
}

/// Opaque local inference engine consuming decrypted bytes.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Produce a response to `query` grounded in the decrypted `context`.
    async fn respond(&self, context: &[u8], query: &str) -> Result<String, VaultError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One transcript entry. Held in memory only; plaintext context is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Binds a vault, a wallet session, and an inference engine into a chat
/// flow over one user's encrypted documents.
pub struct ChatSession {
    vault: Arc<VaultService>,
    wallet: Arc<dyn WalletSession>,
    engine: Arc<dyn InferenceEngine>,
    transcript: Mutex<Vec<ChatMessage>>,
}

impl ChatSession {
    pub fn new(
        vault: Arc<VaultService>,
        wallet: Arc<dyn WalletSession>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            vault,
            wallet,
            engine,
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Ask a question against one blob: retrieve, decrypt, hand the
    /// plaintext to the engine, and record the exchange.
    pub async fn ask(&self, blob_id: BlobId, query: &str) -> Result<String, VaultError> {
        if !self.wallet.is_connected() {
            return Err(VaultError::validation("wallet not connected"));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(VaultError::validation("query is empty"));
        }

        let cancel = CancellationToken::new();
        let plaintext = self.vault.retrieve(blob_id, &cancel).await?;

        tracing::debug!(
            blob_id = %blob_id,
            context_bytes = plaintext.len(),
            "handing decrypted context to inference engine"
        );
        let response = self.engine.respond(&plaintext, query).await?;

        let mut transcript = self.transcript.lock().unwrap();
        transcript.push(ChatMessage {
            role: ChatRole::User,
            content: query.to_string(),
        });
        transcript.push(ChatMessage {
            role: ChatRole::Assistant,
            content: response.clone(),
        });

        Ok(response)
    }

    /// Copy of the conversation so far.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.lock().unwrap().clone()
    }

    /// Seal the vault's keys under the wallet session secret and write the
    /// snapshot to `path`, for recovery on another device.
    pub fn seal_keys_to(&self, path: &Path) -> anyhow::Result<()> {
        if !self.wallet.is_connected() {
            anyhow::bail!("wallet not connected");
        }
        let secret = self.wallet.session_secret();
        keystore::save(self.vault.key_manager(), path, &secret)
    }

    /// Restore keys sealed on another device. Returns the number of keys
    /// recovered.
    pub fn restore_keys_from(&self, path: &Path) -> anyhow::Result<usize> {
        if !self.wallet.is_connected() {
            anyhow::bail!("wallet not connected");
        }
        let secret = self.wallet.session_secret();
        keystore::load(self.vault.key_manager(), path, &secret)
    }
}
