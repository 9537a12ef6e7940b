//! Durable blob registry: the SQLite index of every upload the vault tracks.
//!
//! One row per blob, insertion order preserved via rowid. Each mutation is
//! a single statement, so a crash mid-upload leaves at worst a visible
//! provisional row, never a finalized row without confirmed ciphertext.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};

use ghostvault_protocol::blob::{Blob, BlobState, CipherAlgorithm, EncryptionMetadata};
use ghostvault_protocol::error::VaultError;
use ghostvault_protocol::types::{BlobId, ContentId};

/// Registry schema version, stored in `PRAGMA user_version`. Bump when
/// adding fields; old databases migrate forward, newer ones are refused.
const SCHEMA_VERSION: i64 = 1;

/// Manages blob records in SQLite.
///
/// Thread-safe: the inner connection is protected by a `Mutex`.
pub struct BlobRegistry {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> VaultError {
    VaultError::Registry {
        reason: e.to_string(),
    }
}

struct RawBlobRow {
    id: String,
    name: String,
    content_id: Option<String>,
    size: i64,
    uploaded_at: i64,
    algorithm: String,
    key_ref: String,
    state: String,
}

impl RawBlobRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            content_id: row.get(2)?,
            size: row.get(3)?,
            uploaded_at: row.get(4)?,
            algorithm: row.get(5)?,
            key_ref: row.get(6)?,
            state: row.get(7)?,
        })
    }

    fn into_blob(self) -> Result<Blob, VaultError> {
        let corrupt = |what: &str| VaultError::Registry {
            reason: format!("corrupt registry row: bad {what}"),
        };
        Ok(Blob {
            id: BlobId::from_hex(&self.id).ok_or_else(|| corrupt("blob id"))?,
            name: self.name,
            content_id: self.content_id.map(ContentId),
            size: self.size as u64,
            uploaded_at: self.uploaded_at,
            encryption: EncryptionMetadata {
                algorithm: CipherAlgorithm::parse(&self.algorithm)
                    .ok_or_else(|| corrupt("algorithm"))?,
                key_ref: self.key_ref,
            },
            state: BlobState::parse(&self.state).ok_or_else(|| corrupt("state"))?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, name, content_id, size, uploaded_at, algorithm, key_ref, state";

impl BlobRegistry {
    /// Open (or create) the registry database under `storage_dir`.
    pub fn open(storage_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&storage_dir).with_context(|| {
            format!(
                "failed to create storage directory: {}",
                storage_dir.display()
            )
        })?;

        let db_path = storage_dir.join("ghostvault.db");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open registry: {}", db_path.display()))?;
        Self::init_schema(&conn)?;

        tracing::info!(db = %db_path.display(), "blob registry opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a throwaway in-memory registry. No durability; test use only.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory registry")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("failed to read registry schema version")?;
        if version > SCHEMA_VERSION {
            bail!(
                "registry database has schema version {version}, newer than supported {SCHEMA_VERSION}"
            );
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                content_id TEXT,
                size INTEGER NOT NULL,
                uploaded_at INTEGER NOT NULL,
                algorithm TEXT NOT NULL,
                key_ref TEXT NOT NULL,
                state TEXT NOT NULL
            );",
        )
        .context("failed to initialize registry schema")?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("failed to set registry schema version")?;
        Ok(())
    }

    /// Insert a provisional record before the backend upload starts.
    pub fn add_provisional(&self, blob: &Blob) -> Result<(), VaultError> {
        if blob.state != BlobState::Provisional {
            return Err(VaultError::validation(
                "only provisional records can be added",
            ));
        }
        if blob.content_id.is_some() {
            return Err(VaultError::validation(
                "provisional records must not carry a content id",
            ));
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO blobs (id, name, content_id, size, uploaded_at, algorithm, key_ref, state)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                blob.id.to_hex(),
                blob.name,
                blob.size as i64,
                blob.uploaded_at,
                blob.encryption.algorithm.as_str(),
                blob.encryption.key_ref,
                BlobState::Provisional.as_str(),
            ],
        )
        .map_err(db_err)?;

        tracing::debug!(blob_id = %blob.id, name = %blob.name, "provisional record added");
        Ok(())
    }

    /// Finalize a provisional record once the backend confirmed the upload.
    ///
    /// Refuses to touch anything that is not currently provisional, so a
    /// finalized record can never be finalized twice or resurrected.
    pub fn finalize(&self, id: BlobId, content_id: &ContentId) -> Result<(), VaultError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE blobs SET content_id = ?1, state = ?2 WHERE id = ?3 AND state = ?4",
                rusqlite::params![
                    content_id.as_str(),
                    BlobState::Finalized.as_str(),
                    id.to_hex(),
                    BlobState::Provisional.as_str(),
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(VaultError::not_found(format!("provisional blob {id}")));
        }

        tracing::info!(blob_id = %id, content_id = %content_id, "blob finalized");
        Ok(())
    }

    /// Mark a provisional record as failed so the user can retry or purge it.
    pub fn mark_failed(&self, id: BlobId) -> Result<(), VaultError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE blobs SET state = ?1 WHERE id = ?2 AND state = ?3",
                rusqlite::params![
                    BlobState::Failed.as_str(),
                    id.to_hex(),
                    BlobState::Provisional.as_str(),
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(VaultError::not_found(format!("provisional blob {id}")));
        }

        tracing::warn!(blob_id = %id, "blob marked failed");
        Ok(())
    }

    /// Remove a record entirely.
    pub fn remove(&self, id: BlobId) -> Result<(), VaultError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM blobs WHERE id = ?1",
                rusqlite::params![id.to_hex()],
            )
            .map_err(db_err)?;
        if deleted == 0 {
            return Err(VaultError::not_found(format!("blob {id}")));
        }

        tracing::debug!(blob_id = %id, "blob record removed");
        Ok(())
    }

    /// Get a blob record by id.
    pub fn get(&self, id: BlobId) -> Result<Blob, VaultError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM blobs WHERE id = ?1"),
                rusqlite::params![id.to_hex()],
                RawBlobRow::read,
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => raw.into_blob(),
            None => Err(VaultError::not_found(format!("blob {id}"))),
        }
    }

    /// All records in insertion order.
    pub fn list(&self) -> Result<Vec<Blob>, VaultError> {
        self.query_rows(&format!(
            "SELECT {SELECT_COLUMNS} FROM blobs ORDER BY rowid"
        ))
    }

    /// Finalized records only, in insertion order. Provisional and failed
    /// uploads never appear as selectable for retrieval.
    pub fn list_retrievable(&self) -> Result<Vec<Blob>, VaultError> {
        let mut blobs = self.query_rows(&format!(
            "SELECT {SELECT_COLUMNS} FROM blobs WHERE state = 'finalized' ORDER BY rowid"
        ))?;
        blobs.retain(|b| b.is_retrievable());
        Ok(blobs)
    }

    fn query_rows(&self, sql: &str) -> Result<Vec<Blob>, VaultError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt.query_map([], RawBlobRow::read).map_err(db_err)?;

        let mut blobs = Vec::new();
        for row in rows {
            blobs.push(row.map_err(db_err)?.into_blob()?);
        }
        Ok(blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostvault_protocol::blob::now_unix;
    use tempfile::TempDir;

    fn provisional(name: &str) -> Blob {
        let id = BlobId::generate();
        Blob {
            id,
            name: name.to_string(),
            content_id: None,
            size: 11,
            uploaded_at: now_unix(),
            encryption: EncryptionMetadata {
                algorithm: CipherAlgorithm::ChaCha20Poly1305,
                key_ref: id.to_hex(),
            },
            state: BlobState::Provisional,
        }
    }

    #[test]
    fn open_creates_directory_and_database() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("vault");
        let _registry = BlobRegistry::open(dir.clone()).unwrap();

        assert!(dir.exists());
        assert!(dir.join("ghostvault.db").exists());
    }

    #[test]
    fn add_and_get_roundtrip() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("notes.txt");
        registry.add_provisional(&blob).unwrap();

        let fetched = registry.get(blob.id).unwrap();
        assert_eq!(fetched, blob);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let err = registry.get(BlobId::generate()).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn finalize_sets_content_id_and_state() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("doc.pdf");
        registry.add_provisional(&blob).unwrap();

        let content_id = ContentId("cafe".to_string());
        registry.finalize(blob.id, &content_id).unwrap();

        let fetched = registry.get(blob.id).unwrap();
        assert_eq!(fetched.state, BlobState::Finalized);
        assert_eq!(fetched.content_id, Some(content_id));
        assert!(fetched.is_retrievable());
    }

    #[test]
    fn finalize_twice_fails() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("doc.pdf");
        registry.add_provisional(&blob).unwrap();

        let content_id = ContentId("cafe".to_string());
        registry.finalize(blob.id, &content_id).unwrap();
        let err = registry.finalize(blob.id, &content_id).unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn finalize_unknown_blob_fails() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let err = registry
            .finalize(BlobId::generate(), &ContentId("x".to_string()))
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound { .. }));
    }

    #[test]
    fn adding_finalized_record_rejected() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let mut blob = provisional("sneaky.txt");
        blob.state = BlobState::Finalized;
        let err = registry.add_provisional(&blob).unwrap_err();
        assert!(matches!(err, VaultError::Validation { .. }));
    }

    #[test]
    fn mark_failed_keeps_record_but_not_retrievable() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("flaky.txt");
        registry.add_provisional(&blob).unwrap();
        registry.mark_failed(blob.id).unwrap();

        let fetched = registry.get(blob.id).unwrap();
        assert_eq!(fetched.state, BlobState::Failed);
        assert!(registry.list_retrievable().unwrap().is_empty());
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn mark_failed_does_not_downgrade_finalized() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("done.txt");
        registry.add_provisional(&blob).unwrap();
        registry
            .finalize(blob.id, &ContentId("abc".to_string()))
            .unwrap();

        assert!(registry.mark_failed(blob.id).is_err());
        assert_eq!(registry.get(blob.id).unwrap().state, BlobState::Finalized);
    }

    #[test]
    fn remove_deletes_record() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let blob = provisional("gone.txt");
        registry.add_provisional(&blob).unwrap();
        registry.remove(blob.id).unwrap();

        assert!(registry.get(blob.id).is_err());
        assert!(registry.remove(blob.id).is_err());
    }

    #[test]
    fn list_preserves_insertion_order() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let a = provisional("a.txt");
        let b = provisional("b.txt");
        let c = provisional("c.txt");
        registry.add_provisional(&a).unwrap();
        registry.add_provisional(&b).unwrap();
        registry.add_provisional(&c).unwrap();

        let names: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|blob| blob.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn list_retrievable_excludes_provisional_and_failed() {
        let registry = BlobRegistry::open_in_memory().unwrap();
        let pending = provisional("pending.txt");
        let failed = provisional("failed.txt");
        let done = provisional("done.txt");
        registry.add_provisional(&pending).unwrap();
        registry.add_provisional(&failed).unwrap();
        registry.add_provisional(&done).unwrap();

        registry.mark_failed(failed.id).unwrap();
        registry
            .finalize(done.id, &ContentId("abc".to_string()))
            .unwrap();

        let retrievable = registry.list_retrievable().unwrap();
        assert_eq!(retrievable.len(), 1);
        assert_eq!(retrievable[0].id, done.id);
    }

    #[test]
    fn database_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let blob = provisional("durable.txt");

        {
            let registry = BlobRegistry::open(dir.clone()).unwrap();
            registry.add_provisional(&blob).unwrap();
            registry
                .finalize(blob.id, &ContentId("persist".to_string()))
                .unwrap();
        }

        {
            let registry = BlobRegistry::open(dir).unwrap();
            let fetched = registry.get(blob.id).unwrap();
            assert_eq!(fetched.state, BlobState::Finalized);
            assert_eq!(fetched.content_id, Some(ContentId("persist".to_string())));
        }
    }

    #[test]
    fn newer_schema_version_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        {
            let _registry = BlobRegistry::open(dir.clone()).unwrap();
        }
        {
            let conn = Connection::open(dir.join("ghostvault.db")).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(BlobRegistry::open(dir).is_err());
    }
}
