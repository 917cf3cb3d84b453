use std::path::Path;

use chrono::{DateTime, Utc};
use rollcall_core::{Embedding, EMBEDDING_DIM};
use thiserror::Error;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::recorder::AttendanceEvent;

const EMBEDDING_BYTE_LEN: usize = EMBEDDING_DIM * 4;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("template encryption failed")]
    EncryptionFailed,
    #[error("template decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid template blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] rollcall_core::FaceError),
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// Point-read view of an identity, including its enrolled face template.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub id: String,
    pub display_name: String,
    /// `None` when no face has been enrolled for this identity.
    pub face_template: Option<Embedding>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SubjectRecord {
    pub id: String,
    pub name: String,
    pub code: String,
    /// Whether check-ins are currently being accepted for this subject.
    pub session_active: bool,
}

/// Data-service operations the check-in pipeline depends on.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    async fn get_subject(&self, subject_id: &str) -> Result<Option<SubjectRecord>, StoreError>;

    async fn get_identity(&self, identity_id: &str)
        -> Result<Option<IdentityRecord>, StoreError>;

    /// Append one attendance event. Events are never updated or deleted here.
    async fn append_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError>;
}

/// SQLite-backed identity, subject and attendance storage.
///
/// Face templates are AES-256-GCM encrypted before storage and decrypted on
/// retrieval. A per-installation 32-byte key is generated at first use and
/// stored at `{db_dir}/.key` (mode 0600).
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
    enc_key: [u8; 32],
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): use a fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path.parent().unwrap_or(Path::new(".")).join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS identities (
                     id TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL,
                     face_template BLOB,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS subjects (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     code TEXT NOT NULL,
                     session_active INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     id TEXT PRIMARY KEY,
                     subject_id TEXT NOT NULL,
                     identity_id TEXT NOT NULL,
                     display_name TEXT NOT NULL,
                     timestamp TEXT NOT NULL,
                     date TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_identity
                     ON attendance(identity_id, subject_id);
                 CREATE INDEX IF NOT EXISTS idx_attendance_subject
                     ON attendance(subject_id);",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "attendance store opened");
        Ok(Self { conn, enc_key })
    }

    // ── Identities ────────────────────────────────────────────────────────────

    /// Create an identity, or rename an existing one. Keeps any enrolled template.
    pub async fn upsert_identity(&self, id: &str, display_name: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let display_name = display_name.to_string();
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, display_name, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
                    rusqlite::params![id, display_name, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store (or replace) the single face template of an identity.
    ///
    /// Returns `false` if the identity does not exist.
    pub async fn set_face_template(
        &self,
        identity_id: &str,
        template: &Embedding,
    ) -> Result<bool, StoreError> {
        template.validate()?;
        let blob = self.encrypt_template(&template.values)?;
        let identity_id = identity_id.to_string();

        let updated = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE identities SET face_template = ?1 WHERE id = ?2",
                    rusqlite::params![blob, identity_id],
                )?;
                Ok(affected > 0)
            })
            .await?;
        Ok(updated)
    }

    pub async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let id = id.to_string();

        // Fetch the raw row; decrypt outside the blocking closure
        let row: Option<(String, String, Option<Vec<u8>>, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, face_template, created_at
                     FROM identities WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                Ok(rows.next().transpose()?)
            })
            .await?;

        let Some((id, display_name, blob, created_at)) = row else {
            return Ok(None);
        };
        let face_template = match blob {
            Some(blob) if !blob.is_empty() => Some(Embedding::new(self.decrypt_template(&blob)?)),
            _ => None,
        };
        Ok(Some(IdentityRecord {
            id,
            display_name,
            face_template,
            created_at,
        }))
    }

    // ── Subjects ──────────────────────────────────────────────────────────────

    pub async fn upsert_subject(&self, id: &str, name: &str, code: &str) -> Result<(), StoreError> {
        let (id, name, code) = (id.to_string(), name.to_string(), code.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subjects (id, name, code) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, code = excluded.code",
                    [&id, &name, &code],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Open or close the attendance session of a subject.
    ///
    /// Returns `false` if the subject does not exist.
    pub async fn set_session_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE subjects SET session_active = ?1 WHERE id = ?2",
                    rusqlite::params![active, id],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn get_subject(&self, id: &str) -> Result<Option<SubjectRecord>, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, code, session_active FROM subjects WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], |row| {
                    Ok(SubjectRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        session_active: row.get(3)?,
                    })
                })?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Attendance ────────────────────────────────────────────────────────────

    pub async fn append_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance
                         (id, subject_id, identity_id, display_name, timestamp, date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        event.id,
                        event.subject_id,
                        event.identity_id,
                        event.display_name,
                        format_timestamp(&event.timestamp),
                        event.date,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Attendance of one identity, newest first, optionally scoped to a subject.
    pub async fn list_attendance(
        &self,
        identity_id: &str,
        subject_id: Option<&str>,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let identity_id = identity_id.to_string();
        let subject_id = subject_id.map(str::to_string);

        let rows: Vec<(String, String, String, String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, subject_id, identity_id, display_name, timestamp, date
                     FROM attendance
                     WHERE identity_id = ?1 AND (?2 IS NULL OR subject_id = ?2)
                     ORDER BY timestamp DESC",
                )?;
                let rows = stmt.query_map(rusqlite::params![identity_id, subject_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter()
            .map(|(id, subject_id, identity_id, display_name, timestamp, date)| {
                Ok(AttendanceEvent {
                    id,
                    subject_id,
                    identity_id,
                    display_name,
                    timestamp: parse_timestamp(&timestamp)?,
                    date,
                })
            })
            .collect()
    }

    /// Total attendance events recorded for a subject.
    pub async fn count_attendance(&self, subject_id: &str) -> Result<u64, StoreError> {
        let subject_id = subject_id.to_string();
        self.conn
            .call(move |conn| {
                let count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE subject_id = ?1",
                    [&subject_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt template values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_template(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        let plaintext = template_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_template(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_template(&plaintext)
    }
}

impl RecordStore for AttendanceStore {
    async fn get_subject(&self, subject_id: &str) -> Result<Option<SubjectRecord>, StoreError> {
        AttendanceStore::get_subject(self, subject_id).await
    }

    async fn get_identity(
        &self,
        identity_id: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        AttendanceStore::get_identity(self, identity_id).await
    }

    async fn append_attendance(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        AttendanceStore::append_attendance(self, event).await
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn template_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_template(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() != EMBEDDING_BYTE_LEN {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    let template = Embedding::new(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    );
    template.validate()?;
    Ok(template.values)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order equals chronological order.
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
