//! SQLite backend using the `sqlite-vec` extension for similarity search.
//!
//! Embeddings are stored as JSON arrays and compared with
//! `vec_distance_cosine`; payload metadata is stored as JSON text so filters
//! can use `json_extract`. Filter values are compared by their textual form
//! (string and numeric metadata — what FAQ payloads carry).

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, ffi};
use uuid::Uuid;

use crate::types::IndexError;

use super::{PointRecord, SearchFilter, SearchHit, VectorIndex};

/// Persistent [`VectorIndex`] backed by SQLite + sqlite-vec.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Connection,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns a permanent store error when the sqlite-vec extension cannot
    /// be registered or the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, IndexError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| IndexError::store_permanent(err.to_string()))?;

        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS faq_points (
                     id TEXT PRIMARY KEY,
                     text TEXT NOT NULL,
                     metadata TEXT NOT NULL,
                     embedding TEXT NOT NULL
                 )",
                [],
            )?;
            Ok::<_, tokio_rusqlite::rusqlite::Error>(())
        })
        .await
        .map_err(|err| IndexError::store_permanent(err.to_string()))?;

        Ok(Self { conn, dimensions })
    }

    /// Expected embedding dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn register_sqlite_vec() -> Result<(), IndexError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!("sqlite-vec registration failed (code {rc})"))
                } else {
                    Ok(())
                }
            };
            if let Ok(mut guard) = INIT_RESULT.lock() {
                *guard = Some(result);
            }
        });

        INIT_RESULT
            .lock()
            .map_err(|_| IndexError::store_permanent("sqlite-vec init mutex poisoned"))?
            .clone()
            .unwrap_or(Err("sqlite-vec init did not run".to_string()))
            .map_err(IndexError::store_permanent)
    }

    fn encode_embedding(embedding: &[f32]) -> Result<String, IndexError> {
        serde_json::to_string(embedding).map_err(|err| IndexError::store_permanent(err.to_string()))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<usize, IndexError> {
        if points.is_empty() {
            return Ok(0);
        }
        for point in &points {
            if point.embedding.len() != self.dimensions {
                return Err(IndexError::store_permanent(format!(
                    "record {} has {} dimensions, index expects {}",
                    point.vector_id,
                    point.embedding.len(),
                    self.dimensions
                )));
            }
        }

        let rows: Result<Vec<(String, String, String, String)>, IndexError> = points
            .iter()
            .map(|point| {
                Ok((
                    point.vector_id.to_string(),
                    point.text.clone(),
                    point.metadata.to_string(),
                    Self::encode_embedding(&point.embedding)?,
                ))
            })
            .collect();
        let rows = rows?;
        let written = rows.len();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (id, text, metadata, embedding) in rows {
                    tx.execute(
                        "INSERT INTO faq_points (id, text, metadata, embedding)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(id) DO UPDATE SET
                             text = excluded.text,
                             metadata = excluded.metadata,
                             embedding = excluded.embedding",
                        tokio_rusqlite::params![id, text, metadata, embedding],
                    )?;
                }
                tx.commit()?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(())
            })
            .await
            .map_err(|err| IndexError::store_transient(err.to_string()))?;

        Ok(written)
    }

    async fn delete(&self, vector_id: Uuid) -> Result<bool, IndexError> {
        let id = vector_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| conn.execute("DELETE FROM faq_points WHERE id = ?1", [&id]))
            .await
            .map_err(|err| IndexError::store_transient(err.to_string()))?;
        Ok(deleted > 0)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(IndexError::store_permanent(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut sql = String::from(
            "SELECT id, text, metadata, \
             vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance \
             FROM faq_points",
        );
        let mut params: Vec<String> = vec![Self::encode_embedding(query)?];
        if let Some(filter) = filter {
            for (i, (key, value)) in filter.clauses().iter().enumerate() {
                let clause = if i == 0 { " WHERE" } else { " AND" };
                sql.push_str(&format!(
                    "{clause} CAST(json_extract(metadata, ?{}) AS TEXT) = ?{}",
                    params.len() + 1,
                    params.len() + 2
                ));
                params.push(format!("$.{key}"));
                params.push(match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
        }
        sql.push_str(&format!(" ORDER BY distance ASC LIMIT {k}"));

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows =
                    stmt.query_map(tokio_rusqlite::params_from_iter(params.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, f32>(3)?,
                        ))
                    })?;

                let mut collected = Vec::new();
                for row in rows {
                    collected.push(row?);
                }
                Ok::<_, tokio_rusqlite::rusqlite::Error>(collected)
            })
            .await
            .map_err(|err| IndexError::store_transient(err.to_string()))?;

        let mut hits = Vec::with_capacity(rows.len());
        for (id, text, metadata, distance) in rows {
            let vector_id = Uuid::parse_str(&id)
                .map_err(|err| IndexError::store_permanent(format!("corrupt record id: {err}")))?;
            let metadata = serde_json::from_str(&metadata)
                .map_err(|err| IndexError::store_permanent(format!("corrupt metadata: {err}")))?;
            hits.push(SearchHit {
                vector_id,
                // Cosine distance → similarity.
                score: 1.0 - distance,
                text,
                metadata,
            });
        }
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let count = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM faq_points", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .await
            .map_err(|err| IndexError::store_transient(err.to_string()))?;
        Ok(count as usize)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
