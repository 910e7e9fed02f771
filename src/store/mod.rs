//! Persisted vector index backed by SQLite and sqlite-vec.
//!
//! An index is a directory holding a single `index.db`. Passages live in a
//! plain table, their embeddings in a `vec0` virtual table keyed by the same
//! rowid, and `store_meta` records the embedding dimensionality so a store
//! built with one model is never searched with another.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use thiserror::Error;
use tracing::{debug, info};

pub mod cache;
pub mod passage;

pub use cache::{DiskLoader, StoreCache, StoreLoader};
pub use passage::Passage;

/// File name of the database inside an index directory.
pub const INDEX_FILE: &str = "index.db";

const REQUIRED_TABLES: [&str; 3] = ["passages", "vec_passages", "store_meta"];

/// Errors raised while opening a persisted index.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("vector index not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("vector index is unreadable: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("vector index is corrupt: {0}")]
    Corrupt(String),

    #[error("vector index has {found} dimensions, embedder produces {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("vector index loader task failed: {0}")]
    Worker(String),
}

/// Errors raised by queries and writes against an open index.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query vector has {found} dimensions, index expects {expected}")]
    Dimension { expected: usize, found: usize },

    #[error("invalid passage metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("{passages} passages but {vectors} vectors")]
    LengthMismatch { passages: usize, vectors: usize },

    #[error("vector index is corrupt: {0}")]
    Corrupt(String),

    #[error("store connection lock poisoned")]
    Poisoned,
}

static INIT_VEC: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS passages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{{}}'
);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_passages USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

/// Little-endian f32 blob, the layout `vec0` expects.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// An opened vector index supporting nearest-neighbour lookup.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so the connection sits
/// behind a mutex; the store itself is shared read-only through `Arc`.
pub struct VectorStore {
    conn: Mutex<Connection>,
    dimensions: usize,
    path: PathBuf,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Open an existing index directory read-only.
    ///
    /// Fails if the directory or its database is missing, the database does
    /// not carry the expected tables, or it was built for a different
    /// embedding dimensionality than `dimensions`.
    pub fn load(dir: &Path, dimensions: usize) -> Result<Self, LoadError> {
        let db_path = dir.join(INDEX_FILE);
        if !db_path.is_file() {
            return Err(LoadError::NotFound(db_path));
        }

        info!("Loading vector index: {}", db_path.display());
        init_sqlite_vec();

        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let present: usize = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE name IN (?1, ?2, ?3)",
            params![REQUIRED_TABLES[0], REQUIRED_TABLES[1], REQUIRED_TABLES[2]],
            |row| row.get(0),
        )?;
        if present != REQUIRED_TABLES.len() {
            return Err(LoadError::Corrupt(format!(
                "expected tables {REQUIRED_TABLES:?}, found {present} of them"
            )));
        }

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let found = stored
            .ok_or_else(|| LoadError::Corrupt("missing dimensions entry".to_string()))?
            .parse::<usize>()
            .map_err(|e| LoadError::Corrupt(format!("bad dimensions entry: {e}")))?;
        if found != dimensions {
            return Err(LoadError::DimensionMismatch {
                expected: dimensions,
                found,
            });
        }

        let store = Self {
            conn: Mutex::new(conn),
            dimensions,
            path: dir.to_path_buf(),
        };
        info!("Vector index loaded ({} passages)", store.len().unwrap_or(0));
        Ok(store)
    }

    /// Create (or reopen for writing) an index directory.
    pub fn create(dir: &Path, dimensions: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        init_sqlite_vec();

        let conn = Connection::open(dir.join(INDEX_FILE))?;
        conn.execute_batch(&schema_sql(dimensions))?;

        // vec0 keeps the width it was created with, so an existing index
        // can only be reopened at that width.
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            Some(value) => {
                let existing = value
                    .parse::<usize>()
                    .map_err(|e| StoreError::Corrupt(format!("bad dimensions entry: {e}")))?;
                if existing != dimensions {
                    return Err(StoreError::Dimension {
                        expected: existing,
                        found: dimensions,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
            path: dir.to_path_buf(),
        })
    }

    /// Append passages with their precomputed embeddings.
    pub fn add_passages(
        &self,
        passages: &[Passage],
        vectors: &[Vec<f32>],
    ) -> Result<usize, StoreError> {
        if passages.len() != vectors.len() {
            return Err(StoreError::LengthMismatch {
                passages: passages.len(),
                vectors: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(StoreError::Dimension {
                expected: self.dimensions,
                found: bad.len(),
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (passage, vector) in passages.iter().zip(vectors) {
            let metadata = serde_json::to_string(&passage.metadata)?;
            let id: i64 = tx.query_row(
                "INSERT INTO passages (content, metadata) VALUES (?1, ?2) RETURNING id",
                params![passage.content, metadata],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO vec_passages (rowid, embedding) VALUES (?1, ?2)",
                params![id, serialize_vector(vector)],
            )?;
        }
        tx.commit()?;

        Ok(passages.len())
    }

    /// Return the `top_k` passages nearest to `query_vector`, nearest first.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<Passage>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::Dimension {
                expected: self.dimensions,
                found: query_vector.len(),
            });
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                p.content,
                p.metadata,
                vec_distance_cosine(v.embedding, ?1) AS distance
            FROM vec_passages v
            JOIN passages p ON p.id = v.rowid
            ORDER BY distance ASC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(query_vector), top_k as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?;

        let mut passages = Vec::new();
        for row in rows {
            let (content, metadata, distance) = row?;
            debug!("retrieved passage at cosine distance {distance:.4}");
            passages.push(Passage {
                content,
                metadata: serde_json::from_str(&metadata)?,
            });
        }
        Ok(passages)
    }

    /// Number of stored passages.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: usize = conn.query_row("SELECT count(*) FROM passages", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}
