//! Chat session tests: wallet gating, inference hand-off, and keystore
//! recovery through the wallet session secret.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ghostvault_crypto::keys::KeyManager;
use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::BlobId;
use ghostvault_store::backend::MemBackend;
use ghostvault_store::registry::BlobRegistry;
use ghostvault_store::retry::RetryPolicy;
use ghostvault_vault::chat::{ChatRole, ChatSession, InferenceEngine, WalletSession};
use ghostvault_vault::{VaultConfig, VaultService};

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

struct StubWallet {
    connected: AtomicBool,
    secret: [u8; 32],
}

impl StubWallet {
    fn connected(secret: [u8; 32]) -> Self {
        Self {
            connected: AtomicBool::new(true),
            secret,
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl WalletSession for StubWallet {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn session_secret(&self) -> [u8; 32] {
        self.secret
    }
}

/// Records the context it was handed and echoes a canned answer.
#[derive(Default)]
struct RecordingEngine {
    last_context: Mutex<Option<Vec<u8>>>,
}

#[async_trait]
impl InferenceEngine for RecordingEngine {
    async fn respond(&self, context: &[u8], query: &str) -> Result<String, VaultError> {
        *self.last_context.lock().unwrap() = Some(context.to_vec());
        Ok(format!("answer to '{query}' over {} bytes", context.len()))
    }
}

fn fast_config() -> VaultConfig {
    VaultConfig {
        max_concurrent_ops: 4,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        },
    }
}

fn new_vault(dir: &std::path::Path) -> Arc<VaultService> {
    Arc::new(VaultService::new(
        Arc::new(BlobRegistry::open(dir.to_path_buf()).unwrap()),
        Arc::new(KeyManager::new()),
        Arc::new(MemBackend::new()),
        fast_config(),
    ))
}

async fn upload_notes(vault: &VaultService) -> BlobId {
    let cancel = CancellationToken::new();
    vault
        .upload("notes.txt", b"hello world", &cancel)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn ask_requires_connected_wallet() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let vault = new_vault(tmp.path());
    let blob_id = upload_notes(&vault).await;

    let wallet = Arc::new(StubWallet::connected([1; 32]));
    wallet.disconnect();
    let session = ChatSession::new(vault, wallet, Arc::new(RecordingEngine::default()));

    let err = session.ask(blob_id, "what do my notes say?").await.unwrap_err();
    assert!(matches!(err, VaultError::Validation { .. }));
    assert!(session.transcript().is_empty());
}

#[tokio::test]
async fn ask_hands_decrypted_context_to_engine() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let vault = new_vault(tmp.path());
    let blob_id = upload_notes(&vault).await;

    let engine = Arc::new(RecordingEngine::default());
    let session = ChatSession::new(
        vault,
        Arc::new(StubWallet::connected([1; 32])),
        engine.clone(),
    );

    let response = session.ask(blob_id, "summarize").await.unwrap();
    assert_eq!(response, "answer to 'summarize' over 11 bytes");
    assert_eq!(
        engine.last_context.lock().unwrap().as_deref(),
        Some(b"hello world".as_slice())
    );

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, ChatRole::User);
    assert_eq!(transcript[0].content, "summarize");
    assert_eq!(transcript[1].role, ChatRole::Assistant);
    assert_eq!(transcript[1].content, response);
}

#[tokio::test]
async fn empty_query_rejected() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let vault = new_vault(tmp.path());
    let blob_id = upload_notes(&vault).await;

    let session = ChatSession::new(
        vault,
        Arc::new(StubWallet::connected([1; 32])),
        Arc::new(RecordingEngine::default()),
    );
    let err = session.ask(blob_id, "   ").await.unwrap_err();
    assert!(matches!(err, VaultError::Validation { .. }));
}

#[tokio::test]
async fn ask_surfaces_missing_blob_as_not_found() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let vault = new_vault(tmp.path());

    let session = ChatSession::new(
        vault,
        Arc::new(StubWallet::connected([1; 32])),
        Arc::new(RecordingEngine::default()),
    );
    let err = session.ask(BlobId::generate(), "anything?").await.unwrap_err();
    assert!(matches!(err, VaultError::NotFound { .. }));
}

#[tokio::test]
async fn keys_sealed_on_one_session_restore_on_another() {
    init_test_tracing();
    let tmp = TempDir::new().unwrap();
    let keystore_path = tmp.path().join("keystore.bin");
    let wallet_secret = [7; 32];

    // Device one: upload and seal keys under the wallet secret
    let registry = Arc::new(BlobRegistry::open(tmp.path().join("db")).unwrap());
    let backend = Arc::new(MemBackend::new());
    let first_vault = Arc::new(VaultService::new(
        registry.clone(),
        Arc::new(KeyManager::new()),
        backend.clone(),
        fast_config(),
    ));
    let blob_id = upload_notes(&first_vault).await;

    let first_session = ChatSession::new(
        first_vault,
        Arc::new(StubWallet::connected(wallet_secret)),
        Arc::new(RecordingEngine::default()),
    );
    first_session.seal_keys_to(&keystore_path).unwrap();

    // Device two: same wallet, fresh key manager
    let second_vault = Arc::new(VaultService::new(
        registry,
        Arc::new(KeyManager::new()),
        backend,
        fast_config(),
    ));
    let second_session = ChatSession::new(
        second_vault,
        Arc::new(StubWallet::connected(wallet_secret)),
        Arc::new(RecordingEngine::default()),
    );

    let restored = second_session.restore_keys_from(&keystore_path).unwrap();
    assert_eq!(restored, 1);

    let response = second_session.ask(blob_id, "still readable?").await.unwrap();
    assert_eq!(response, "answer to 'still readable?' over 11 bytes");
}
