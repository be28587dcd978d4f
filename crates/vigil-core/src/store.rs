//! Enrollment store: one baseline embedding per user, plus nearest-neighbour search.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::types::{Embedding, Neighbor};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt embedding for user {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent mapping from user id to baseline embedding.
///
/// Implementations are blocking; async callers run them on a blocking
/// thread and never while holding the session cache lock.
pub trait EnrollmentStore: Send + Sync {
    /// Baseline for `user_id`, or `None` if the user is not enrolled.
    fn get(&self, user_id: &str) -> Result<Option<Embedding>, StoreError>;

    /// Store `embedding` as the baseline for `user_id`, replacing any previous one.
    fn put(&self, user_id: &str, embedding: &Embedding) -> Result<(), StoreError>;

    /// Remove the baseline. Returns false if the user was not enrolled.
    fn delete(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Up to `n` enrolled users closest to `probe`, ascending by distance.
    fn query_nearest(&self, probe: &Embedding, n: usize) -> Result<Vec<Neighbor>, StoreError>;

    /// Number of enrolled users.
    fn count(&self) -> Result<usize, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS baselines (
    user_id       TEXT PRIMARY KEY NOT NULL,
    dim           INTEGER NOT NULL,
    embedding     BLOB NOT NULL,
    model_version TEXT,
    enrolled_at   TEXT NOT NULL
);
";

/// SQLite-backed enrollment store. Search is an exact linear scan.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened enrollment store");
        Self::init(conn)
    }

    /// In-memory database, discarded on drop.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(user_id: &str, dim: i64, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        user_id: user_id.to_string(),
        reason,
    };
    if blob.len() % 4 != 0 {
        return Err(corrupt(format!("blob length {} is not a multiple of 4", blob.len())));
    }
    let values: Vec<f32> = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if values.len() as i64 != dim {
        return Err(corrupt(format!("expected {dim} values, found {}", values.len())));
    }
    Ok(values)
}

impl EnrollmentStore for SqliteStore {
    fn get(&self, user_id: &str) -> Result<Option<Embedding>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT dim, embedding, model_version FROM baselines WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((dim, blob, model_version)) = row else {
            return Ok(None);
        };
        Ok(Some(Embedding {
            values: decode(user_id, dim, &blob)?,
            model_version,
        }))
    }

    fn put(&self, user_id: &str, embedding: &Embedding) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO baselines (user_id, dim, embedding, model_version, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                dim = excluded.dim,
                embedding = excluded.embedding,
                model_version = excluded.model_version,
                enrolled_at = excluded.enrolled_at",
            params![
                user_id,
                embedding.dim() as i64,
                encode(&embedding.values),
                embedding.model_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn()
            .execute("DELETE FROM baselines WHERE user_id = ?1", params![user_id])?;
        Ok(n > 0)
    }

    fn query_nearest(&self, probe: &Embedding, n: usize) -> Result<Vec<Neighbor>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT user_id, dim, embedding FROM baselines")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (user_id, dim, blob) = row?;
            if dim as usize != probe.dim() {
                tracing::warn!(user_id = %user_id, dim, probe_dim = probe.dim(), "skipping baseline with mismatched dimension");
                continue;
            }
            let baseline = Embedding::new(decode(&user_id, dim, &blob)?);
            hits.push(Neighbor {
                distance: probe.euclidean_distance(&baseline),
                user_id,
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.user_id.cmp(&b.user_id)));
        hits.truncate(n);
        Ok(hits)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM baselines", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
